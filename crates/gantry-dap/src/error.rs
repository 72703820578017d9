//! Error types for the DAP server core.

use thiserror::Error;

/// Stable error ids carried in `body.error.id` of failed responses.
pub mod ids {
    /// A launch request could not be fulfilled.
    pub const FAILED_TO_LAUNCH: i64 = 3000;
    /// A setBreakpoints request could not be processed.
    pub const UNABLE_TO_SET_BREAKPOINTS: i64 = 2002;
    /// A continue request could not resume the debuggee.
    pub const FAILED_TO_CONTINUE: i64 = 3002;
    /// A request arrived in a session state that does not accept it.
    pub const REQUEST_OUT_OF_ORDER: i64 = 1010;
    /// The command is not implemented by this server.
    pub const UNSUPPORTED_COMMAND: i64 = 9999;
}

/// Errors from the session transport and lifecycle.
#[derive(Debug, Error)]
pub enum DapError {
    /// Underlying stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level framing error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer sent a frame that is not a valid protocol message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The outbound channel has been shut down by teardown.
    #[error("transport closed")]
    Closed,

    /// A lifecycle transition was requested from the wrong state.
    #[error("request rejected: {message}")]
    Rejected {
        /// Why the transition was refused.
        message: String,
    },
}

/// The error payload of a failed response.
///
/// `summary` travels in the response's `message` field; `id` and `format`
/// travel in `body.error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub id: i64,
    pub summary: String,
    pub format: String,
}

impl ErrorInfo {
    pub fn new(id: i64, summary: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            id,
            summary: summary.into(),
            format: format.into(),
        }
    }

    /// Error for a request the current session state does not accept.
    pub fn out_of_order(command: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            ids::REQUEST_OUT_OF_ORDER,
            "Request out of order",
            format!("Unable to process '{command}': {detail}"),
        )
    }

    /// Error for a command this server does not implement.
    pub fn unsupported(command: &str) -> Self {
        Self::new(
            ids::UNSUPPORTED_COMMAND,
            "Unsupported command",
            format!("Unable to process '{command}': the command is not supported"),
        )
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.id, self.format)
    }
}
