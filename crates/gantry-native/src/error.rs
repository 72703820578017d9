use std::path::PathBuf;

use gantry_dap::EngineError;
use thiserror::Error;

/// Errors raised inside the native engine.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(target_os = "linux")]
    #[error("ptrace: {0}")]
    Ptrace(#[from] nix::errno::Errno),

    #[error("object file: {0}")]
    Object(#[from] object::Error),

    #[error("DWARF: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error("no line information in {0}")]
    NoLineInfo(PathBuf),

    #[error("{0} is not mapped in the debuggee")]
    NotMapped(PathBuf),

    #[error("short {op}: {done} of {wanted} bytes at {addr:#x}")]
    ShortTransfer {
        op: &'static str,
        addr: u64,
        done: usize,
        wanted: usize,
    },

    #[error("unexpected stop while starting the debuggee: {0}")]
    UnexpectedStop(String),

    #[error("debuggee has exited")]
    Exited,

    #[error("tracer thread is gone")]
    TracerGone,

    #[error("native debugging is not supported on this platform")]
    Unsupported,
}

impl From<NativeError> for EngineError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::Io(e) => EngineError::Io(e),
            NativeError::Exited => EngineError::Exited,
            NativeError::Unsupported => EngineError::Unsupported(err.to_string()),
            other => EngineError::Other(other.to_string()),
        }
    }
}
