//! DAP protocol message types.
//!
//! The wire envelope types plus the argument and body shapes of the
//! commands and events this server speaks. All types round-trip through
//! serde; field names follow the protocol's camelCase.

use serde::{Deserialize, Serialize};

use crate::error::{DapError, ErrorInfo};

// ---------------------------------------------------------------------------
// Base protocol messages
// ---------------------------------------------------------------------------

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number chosen by the client.
    pub seq: i64,
    /// Always "request".
    #[serde(rename = "type")]
    pub message_type: String,
    /// The command to execute.
    pub command: String,
    /// Command arguments (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

impl Request {
    /// Build a request, mainly for clients and tests.
    pub fn new(seq: i64, command: impl Into<String>, arguments: Option<serde_json::Value>) -> Self {
        Self {
            seq,
            message_type: "request".into(),
            command: command.into(),
            arguments,
        }
    }

    /// Interpret a decoded frame as an inbound request.
    ///
    /// A client only ever sends requests, so responses, events and anything
    /// that is not a protocol message at all are errors.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DapError> {
        let message_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| DapError::Malformed("missing message type".into()))?;
        match message_type {
            "request" => serde_json::from_value(value)
                .map_err(|e| DapError::Malformed(format!("invalid request: {e}"))),
            other => Err(DapError::Malformed(format!(
                "expected a request, got message type '{other}'"
            ))),
        }
    }

    /// Decode the arguments into a typed structure.
    ///
    /// Absent arguments decode as an empty object so that structures with
    /// all-optional fields still succeed.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let args = self
            .arguments
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        serde_json::from_value(args)
    }
}

/// Request commands defined by the Debug Adapter Protocol.
///
/// Client requests outside this set cannot be decoded at all and end the
/// connection; those inside it that the server does not handle get an
/// "unsupported command" error response.
pub const DAP_COMMANDS: &[&str] = &[
    "attach",
    "breakpointLocations",
    "cancel",
    "completions",
    "configurationDone",
    "continue",
    "dataBreakpointInfo",
    "disassemble",
    "disconnect",
    "evaluate",
    "exceptionInfo",
    "goto",
    "gotoTargets",
    "initialize",
    "launch",
    "loadedSources",
    "locations",
    "modules",
    "next",
    "pause",
    "readMemory",
    "restart",
    "restartFrame",
    "reverseContinue",
    "scopes",
    "setBreakpoints",
    "setDataBreakpoints",
    "setExceptionBreakpoints",
    "setExpression",
    "setFunctionBreakpoints",
    "setInstructionBreakpoints",
    "setVariable",
    "source",
    "stackTrace",
    "stepBack",
    "stepIn",
    "stepInTargets",
    "stepOut",
    "terminate",
    "terminateThreads",
    "threads",
    "variables",
    "writeMemory",
];

pub fn is_dap_command(command: &str) -> bool {
    DAP_COMMANDS.contains(&command)
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number; stamped by the outbound channel.
    pub seq: i64,
    /// Always "response".
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Whether the request was successful.
    pub success: bool,
    /// The command this response is for.
    pub command: String,
    /// Short error summary if `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body (command-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Response {
    pub fn success(request_seq: i64, command: &str, body: Option<serde_json::Value>) -> Self {
        Self {
            seq: 0,
            message_type: "response".into(),
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        }
    }

    pub fn failure(request_seq: i64, command: &str, error: &ErrorInfo) -> Self {
        let body = ErrorResponseBody {
            error: Message {
                id: error.id,
                format: error.format.clone(),
                show_user: None,
            },
        };
        Self {
            seq: 0,
            message_type: "response".into(),
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(error.summary.clone()),
            body: serde_json::to_value(body).ok(),
        }
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number; stamped by the outbound channel.
    pub seq: i64,
    /// Always "event".
    #[serde(rename = "type")]
    pub message_type: String,
    /// The event type.
    pub event: String,
    /// Event body (event-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            seq: 0,
            message_type: "event".into(),
            event: event.into(),
            body,
        }
    }

    /// Build an event from a typed body.
    pub fn with_body<B: Serialize>(event: impl Into<String>, body: &B) -> Self {
        Self::new(event, serde_json::to_value(body).ok())
    }
}

/// A structured error message (`body.error` of a failed response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable error id.
    pub id: i64,
    /// Human-readable message.
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_user: Option<bool>,
}

/// Body of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponseBody {
    pub error: Message,
}

// ---------------------------------------------------------------------------
// Initialize
// ---------------------------------------------------------------------------

/// Arguments for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArguments {
    /// ID of the client (e.g. "vscode").
    #[serde(skip_serializing_if = "Option::is_none", rename = "clientID")]
    pub client_id: Option<String>,
    /// Human-readable name of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// ID of the debug adapter the client asked for.
    #[serde(skip_serializing_if = "Option::is_none", rename = "adapterID")]
    pub adapter_id: Option<String>,
    /// Whether lines are 1-based. Defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_start_at1: Option<bool>,
    /// Path format: "path" or "uri".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_format: Option<String>,
}

/// Capabilities returned in the `initialize` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// The adapter supports the `configurationDone` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_configuration_done_request: Option<bool>,
    /// The adapter supports conditional breakpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_conditional_breakpoints: Option<bool>,
    /// The adapter supports hit conditional breakpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_hit_conditional_breakpoints: Option<bool>,
    /// The adapter supports function breakpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_function_breakpoints: Option<bool>,
    /// The adapter supports `evaluate` for hovers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_evaluate_for_hovers: Option<bool>,
    /// The adapter supports the `terminate` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_terminate_request: Option<bool>,
    /// Exception breakpoint filters offered to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_breakpoint_filters: Option<Vec<serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

/// A source location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Short name of the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File system path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Source reference (for sources without a file path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

/// Arguments for the `setBreakpoints` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    /// The source to set breakpoints for.
    pub source: Source,
    /// Breakpoints to set (replaces all previous ones for the source).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated plain line list, honoured when `breakpoints` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<i64>>,
}

impl SetBreakpointsArguments {
    /// Requested lines in request order.
    pub fn requested_lines(&self) -> Vec<i64> {
        match (&self.breakpoints, &self.lines) {
            (Some(bps), _) => bps.iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines.clone(),
            (None, None) => Vec::new(),
        }
    }
}

/// A source breakpoint as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// The source line of the breakpoint.
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Response body for `setBreakpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsResponseBody {
    /// Information about the placed breakpoints.
    pub breakpoints: Vec<BreakpointResponse>,
}

/// A breakpoint as reported back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResponse {
    /// Unique identifier for the breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the breakpoint has been verified.
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Actual line of the breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
}

/// Arguments for the `setExceptionBreakpoints` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    #[serde(default)]
    pub filters: Vec<String>,
}

// ---------------------------------------------------------------------------
// Execution control
// ---------------------------------------------------------------------------

/// Arguments for the `continue` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueArguments {
    /// The thread to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Whether to continue just this thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_thread: Option<bool>,
}

/// Response body for `continue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseBody {
    pub all_threads_continued: bool,
}

/// Arguments for the `disconnect` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    /// Whether to terminate the debuggee.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_debuggee: Option<bool>,
}

// ---------------------------------------------------------------------------
// Event bodies
// ---------------------------------------------------------------------------

/// Reason why the debuggee stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// A step completed.
    Step,
    /// A breakpoint was hit.
    Breakpoint,
    /// The debuggee received a fault signal.
    Exception,
    /// A pause was fulfilled.
    Pause,
    /// The entry point was reached.
    Entry,
}

/// Body of the `stopped` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// The reason for the stop.
    pub reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Thread that stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    /// Whether all threads are stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
}

/// Body of the `output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    /// Output category: "console", "stdout", "stderr".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// The output text.
    pub output: String,
}

/// Body of the `terminated` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedEventBody {
    /// Restart data; if present, a restart is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
