//! The seam between the session and a debugging engine.
//!
//! A [`Backend`] starts debuggees; a [`Debuggee`] is one traced process.
//! Asynchronous happenings (stops, exit, output) flow back to the session
//! as [`Notification`]s over an unbounded channel.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque engine-side identity of a placed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointHandle(pub u64);

/// Why the debuggee stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Entry,
    Breakpoint,
    Step,
    Pause,
    /// Stopped by a signal with the given number.
    Signal(i32),
}

/// Snapshot of a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub thread_id: i64,
    pub all_threads_stopped: bool,
    pub cause: StopCause,
}

/// Output stream a chunk of debuggee output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Stdout,
    Stderr,
    Console,
}

impl OutputCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputCategory::Stdout => "stdout",
            OutputCategory::Stderr => "stderr",
            OutputCategory::Console => "console",
        }
    }
}

/// Something the engine observed while the debuggee ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Stopped(StopReport),
    Exited { exit_code: i64 },
    Output { category: OutputCategory, text: String },
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Outcome of asking the engine for a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Placed; `line` is the line the engine actually chose.
    Verified { handle: BreakpointHandle, line: i64 },
    Unverified { reason: String },
}

/// What to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }
}

/// Errors reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operating system refused an operation; the message is passed
    /// through untouched.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("debuggee has exited")]
    Exited,

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// Starts debuggees.
pub trait Backend: Send + Sync {
    /// Spawn `spec.program` under engine control, stopped at its entry point.
    ///
    /// Runs on a blocking thread; implementations may block.
    fn launch(
        &self,
        spec: &LaunchSpec,
        notifications: NotificationSender,
    ) -> Result<Box<dyn Debuggee>, EngineError>;
}

/// A process under engine control.
pub trait Debuggee: Send {
    /// Where the process is parked right after launch.
    fn entry_stop(&self) -> StopReport;

    fn set_breakpoint(&mut self, file: &Path, line: i64) -> Placement;

    fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), EngineError>;

    /// Resume execution. Resuming a running process is a no-op.
    fn resume(&mut self) -> Result<(), EngineError>;

    fn kill(&mut self) -> Result<(), EngineError>;
}
