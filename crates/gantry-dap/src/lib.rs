//! gantry-dap: the Debug Adapter Protocol server core.
//!
//! Accepts DAP clients, frames and sequences messages, drives each session
//! through its lifecycle, and delegates process control to a pluggable
//! [`engine::Backend`] and compilation to a [`builder::Builder`].

pub mod breakpoint;
pub mod builder;
pub mod capabilities;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod launch;
pub mod outbound;
pub mod protocol;
pub mod sequencer;
pub mod server;
pub mod session;
pub mod teardown;
pub mod transport;

// Re-export key types for convenience.
pub use breakpoint::{Breakpoint, BreakpointTable};
pub use builder::{BuildKind, Builder, CargoBuilder};
pub use capabilities::ServerCapabilities;
pub use engine::{
    Backend, BreakpointHandle, Debuggee, EngineError, LaunchSpec, Notification, Placement,
    StopCause, StopReport,
};
pub use error::{DapError, ErrorInfo};
pub use launch::{LaunchConfig, LaunchError, LaunchMode, LaunchOrchestrator};
pub use sequencer::{SeqMode, Sequencer};
pub use server::{serve_connection, Server, ServerHandle, ServerOptions, SessionEnv, SessionOptions};
pub use session::{SessionLifecycle, SessionState};
