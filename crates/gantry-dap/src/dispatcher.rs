//! Request handling for one session.
//!
//! Requests are handled one at a time, in arrival order. Each handler
//! validates the session state first, does its work, and yields either a
//! response body or an [`ErrorInfo`]. Events that must precede a response
//! are emitted by the handler before it returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::breakpoint::{Breakpoint, BreakpointTable};
use crate::capabilities::ServerCapabilities;
use crate::context::SessionContext;
use crate::engine::Debuggee;
use crate::error::{ids, DapError, ErrorInfo};
use crate::events::{spawn_forwarder, stopped_event};
use crate::launch::{LaunchConfig, LaunchOrchestrator};
use crate::protocol::{
    is_dap_command, ContinueArguments, ContinueResponseBody, DisconnectArguments, Event,
    InitializeRequestArguments, Request, Response, SetBreakpointsArguments,
    SetBreakpointsResponseBody, SetExceptionBreakpointsArguments, StopReason,
};
use crate::session::{SessionState, CONFIGURABLE};
use crate::teardown::Teardown;

/// What the read loop should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

type Outcome = Result<Option<Value>, ErrorInfo>;

pub struct Dispatcher {
    context: Arc<SessionContext>,
    teardown: Arc<Teardown>,
    orchestrator: Arc<LaunchOrchestrator>,
    capabilities: ServerCapabilities,
    breakpoints: BreakpointTable,
    launch: Option<LaunchConfig>,
    terminate_grace: Duration,
}

impl Dispatcher {
    pub fn new(
        context: Arc<SessionContext>,
        teardown: Arc<Teardown>,
        orchestrator: Arc<LaunchOrchestrator>,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            context,
            teardown,
            orchestrator,
            capabilities: ServerCapabilities::default(),
            breakpoints: BreakpointTable::new(),
            launch: None,
            terminate_grace,
        }
    }

    pub async fn dispatch(&mut self, request: Request) -> Flow {
        self.context.outbound.sequencer().begin_request(request.seq);
        debug!(seq = request.seq, command = %request.command, "<- request");

        if request.command == "disconnect" {
            return self.on_disconnect(&request).await;
        }
        if !is_dap_command(&request.command) {
            warn!(command = %request.command, "undecodable command; closing connection");
            return Flow::Close;
        }

        let outcome = match request.command.as_str() {
            "initialize" => self.on_initialize(&request).await,
            "launch" => self.on_launch(&request).await,
            "setBreakpoints" => self.on_set_breakpoints(&request).await,
            "setExceptionBreakpoints" => self.on_set_exception_breakpoints(&request).await,
            "configurationDone" => self.on_configuration_done().await,
            "continue" => self.on_continue(&request).await,
            other => {
                warn!(command = other, "unsupported command");
                Err(ErrorInfo::unsupported(other))
            }
        };
        self.reply(&request.command, outcome).await;
        Flow::Continue
    }

    async fn reply(&self, command: &str, outcome: Outcome) {
        let request_seq = self.context.outbound.sequencer().current_request_seq();
        let response = match outcome {
            Ok(body) => Response::success(request_seq, command, body),
            Err(error) => {
                info!(command, %error, "request failed");
                Response::failure(request_seq, command, &error)
            }
        };
        if let Err(e) = self.context.outbound.respond(response).await {
            debug!(command, "response not delivered: {e}");
        }
    }

    async fn on_initialize(&mut self, request: &Request) -> Outcome {
        self.context
            .lifecycle
            .lock()
            .await
            .initialize()
            .map_err(|e| out_of_order("initialize", e))?;
        if let Ok(args) = request.parse_arguments::<InitializeRequestArguments>() {
            info!(client = ?args.client_id, adapter = ?args.adapter_id, "session initialized");
        }
        to_body(&self.capabilities.to_protocol())
    }

    async fn on_launch(&mut self, request: &Request) -> Outcome {
        self.context
            .lifecycle
            .lock()
            .await
            .require("launch", &[SessionState::Initialized])
            .map_err(|e| out_of_order("launch", e))?;

        let args = request.arguments.clone().unwrap_or(Value::Null);
        let config = LaunchConfig::from_arguments(&args).map_err(|e| e.to_error_info())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let launched = self
            .orchestrator
            .launch(&config, tx)
            .await
            .map_err(|e| e.to_error_info())?;

        *self.context.debuggee.lock().await = Some(launched.debuggee);
        *self.context.artifact.lock().await = launched.artifact;
        self.context
            .lifecycle
            .lock()
            .await
            .launched()
            .map_err(|e| out_of_order("launch", e))?;

        spawn_forwarder(
            rx,
            Arc::clone(&self.context),
            Arc::clone(&self.teardown),
            self.terminate_grace,
        );
        if let Err(e) = self.context.outbound.emit(Event::new("initialized", None)).await {
            debug!("initialized event not delivered: {e}");
        }
        self.context
            .lifecycle
            .lock()
            .await
            .await_configuration()
            .map_err(|e| out_of_order("launch", e))?;

        info!(program = %config.program.display(), mode = ?config.mode, "launched");
        self.launch = Some(config);
        Ok(None)
    }

    async fn on_set_breakpoints(&mut self, request: &Request) -> Outcome {
        let args: SetBreakpointsArguments = request
            .parse_arguments()
            .map_err(|e| unable_to_set_breakpoints(e.to_string()))?;
        let path = args
            .source
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| unable_to_set_breakpoints("source has no path"))?;
        let lines = args.requested_lines();

        let previous = self
            .context
            .lifecycle
            .lock()
            .await
            .begin_configuring("setBreakpoints")
            .map_err(|e| out_of_order("setBreakpoints", e))?;

        let mut table = std::mem::take(&mut self.breakpoints);
        let translated = {
            let mut slot = self.context.debuggee.lock().await;
            let (file, requested) = (path.clone(), lines.clone());
            on_blocking_pool(&mut slot, move |debuggee| {
                let placed = match debuggee.as_mut() {
                    Some(debuggee) => table.translate(&file, &requested, Some(&mut **debuggee)),
                    None => table.translate(&file, &requested, None),
                };
                (table, placed)
            })
            .await
        };
        self.context.lifecycle.lock().await.end_configuring(previous);
        let (table, placed) = translated.map_err(unable_to_set_breakpoints)?;
        self.breakpoints = table;

        let verified: Vec<_> = placed
            .iter()
            .filter(|bp| bp.verified)
            .map(Breakpoint::to_response)
            .collect();
        info!(
            path = %path.display(),
            requested = lines.len(),
            verified = verified.len(),
            "breakpoints set"
        );
        to_body(&SetBreakpointsResponseBody {
            breakpoints: verified,
        })
    }

    async fn on_set_exception_breakpoints(&mut self, request: &Request) -> Outcome {
        self.context
            .lifecycle
            .lock()
            .await
            .require("setExceptionBreakpoints", CONFIGURABLE)
            .map_err(|e| out_of_order("setExceptionBreakpoints", e))?;
        let args: SetExceptionBreakpointsArguments = request.parse_arguments().unwrap_or_default();
        if !args.filters.is_empty() {
            debug!(filters = ?args.filters, "exception filters ignored");
        }
        Ok(None)
    }

    async fn on_configuration_done(&mut self) -> Outcome {
        self.context
            .lifecycle
            .lock()
            .await
            .require("configurationDone", &[SessionState::AwaitingLaunch])
            .map_err(|e| out_of_order("configurationDone", e))?;
        let stop_on_entry = self.launch.as_ref().is_some_and(|c| c.stop_on_entry);

        if stop_on_entry {
            let report = self
                .context
                .debuggee
                .lock()
                .await
                .as_ref()
                .map(|d| d.entry_stop())
                .ok_or_else(|| out_of_order("configurationDone", "no debuggee"))?;
            self.context
                .lifecycle
                .lock()
                .await
                .configuration_done(true)
                .map_err(|e| out_of_order("configurationDone", e))?;
            let event = stopped_event(StopReason::Breakpoint, &report);
            if let Err(e) = self.context.outbound.emit(event).await {
                debug!("stopped event not delivered: {e}");
            }
        } else {
            self.context
                .lifecycle
                .lock()
                .await
                .configuration_done(false)
                .map_err(|e| out_of_order("configurationDone", e))?;
            self.resume_debuggee().await?;
        }
        Ok(None)
    }

    async fn on_continue(&mut self, request: &Request) -> Outcome {
        let args: ContinueArguments = request.parse_arguments().unwrap_or_default();
        let previous = {
            let mut lifecycle = self.context.lifecycle.lock().await;
            let previous = lifecycle.state();
            lifecycle
                .resume()
                .map_err(|e| out_of_order("continue", e))?;
            previous
        };
        debug!(thread = ?args.thread_id, "continue");

        if let Err(error) = self.resume_debuggee().await {
            if previous == SessionState::Stopped {
                let _ = self.context.lifecycle.lock().await.handle_stopped();
            }
            return Err(error);
        }
        to_body(&ContinueResponseBody {
            all_threads_continued: true,
        })
    }

    async fn on_disconnect(&mut self, request: &Request) -> Flow {
        let args: DisconnectArguments = request.parse_arguments().unwrap_or_default();
        info!(terminate_debuggee = ?args.terminate_debuggee, "disconnect requested");
        self.reply(&request.command, Ok(None)).await;
        self.teardown.stop().await;
        Flow::Close
    }

    async fn resume_debuggee(&self) -> Result<(), ErrorInfo> {
        let mut slot = self.context.debuggee.lock().await;
        if slot.is_none() {
            return Err(failed_to_continue("debuggee is not running"));
        }
        on_blocking_pool(&mut slot, |debuggee| match debuggee.as_mut() {
            Some(debuggee) => debuggee.resume().map_err(failed_to_continue),
            None => Err(failed_to_continue("debuggee is not running")),
        })
        .await
        .map_err(failed_to_continue)?
    }
}

/// Run an engine call on the blocking pool.
///
/// The debuggee is moved out of `slot` for the call and put back when it
/// returns. Engine calls may wait on the tracer, so they stay off the async
/// workers.
async fn on_blocking_pool<T, F>(slot: &mut Option<Box<dyn Debuggee>>, call: F) -> Result<T, String>
where
    F: FnOnce(&mut Option<Box<dyn Debuggee>>) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut debuggee = slot.take();
    let (debuggee, out) = tokio::task::spawn_blocking(move || {
        let out = call(&mut debuggee);
        (debuggee, out)
    })
    .await
    .map_err(|e| format!("engine task failed: {e}"))?;
    *slot = debuggee;
    Ok(out)
}

fn to_body<T: serde::Serialize>(body: &T) -> Outcome {
    Ok(serde_json::to_value(body).ok())
}

fn out_of_order(command: &str, err: impl Into<Rejection>) -> ErrorInfo {
    ErrorInfo::out_of_order(command, err.into().0)
}

fn unable_to_set_breakpoints(detail: impl std::fmt::Display) -> ErrorInfo {
    ErrorInfo::new(
        ids::UNABLE_TO_SET_BREAKPOINTS,
        "Unable to set breakpoints",
        format!("Unable to set breakpoints: {detail}"),
    )
}

fn failed_to_continue(detail: impl std::fmt::Display) -> ErrorInfo {
    ErrorInfo::new(
        ids::FAILED_TO_CONTINUE,
        "Unable to continue",
        format!("Unable to continue: {detail}"),
    )
}

/// Reason text for an out-of-order rejection.
struct Rejection(String);

impl From<DapError> for Rejection {
    fn from(err: DapError) -> Self {
        match err {
            DapError::Rejected { message } => Rejection(message),
            other => Rejection(other.to_string()),
        }
    }
}

impl From<&str> for Rejection {
    fn from(reason: &str) -> Self {
        Rejection(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildKind, Builder};
    use crate::engine::{
        Backend, BreakpointHandle, EngineError, LaunchSpec, NotificationSender, Placement,
        StopCause, StopReport,
    };
    use crate::outbound::Outbound;
    use crate::sequencer::SeqMode;
    use crate::transport::FrameReader;
    use serde_json::json;
    use std::path::Path;
    use tokio::io::DuplexStream;

    /// Debuggee that refuses to resume.
    struct Wedged;

    impl Debuggee for Wedged {
        fn entry_stop(&self) -> StopReport {
            StopReport {
                thread_id: 1,
                all_threads_stopped: true,
                cause: StopCause::Entry,
            }
        }

        fn set_breakpoint(&mut self, _file: &Path, line: i64) -> Placement {
            Placement::Verified {
                handle: BreakpointHandle(line as u64),
                line,
            }
        }

        fn remove_breakpoint(&mut self, _handle: BreakpointHandle) -> Result<(), EngineError> {
            Ok(())
        }

        fn resume(&mut self) -> Result<(), EngineError> {
            Err(EngineError::Other("tracer is busy".into()))
        }

        fn kill(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct WedgedBackend;

    impl Backend for WedgedBackend {
        fn launch(
            &self,
            _spec: &LaunchSpec,
            _notifications: NotificationSender,
        ) -> Result<Box<dyn Debuggee>, EngineError> {
            Ok(Box::new(Wedged))
        }
    }

    struct NoBuilder;

    impl Builder for NoBuilder {
        fn build(&self, _kind: BuildKind, _source: &Path, _output: &Path) -> Result<PathBuf, String> {
            Err("no toolchain".into())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        context: Arc<SessionContext>,
        frames: FrameReader<DuplexStream>,
        seq: i64,
    }

    impl Harness {
        fn new() -> Self {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let context = Arc::new(SessionContext::new(Outbound::new(
                Box::new(server),
                SeqMode::Monotonic,
            )));
            let teardown = Arc::new(Teardown::new(Arc::clone(&context)));
            let orchestrator = Arc::new(LaunchOrchestrator::new(
                Arc::new(WedgedBackend),
                Arc::new(NoBuilder),
            ));
            Self {
                dispatcher: Dispatcher::new(
                    Arc::clone(&context),
                    teardown,
                    orchestrator,
                    Duration::ZERO,
                ),
                context,
                frames: FrameReader::new(client),
                seq: 0,
            }
        }

        /// Dispatch a request and return its response, skipping events.
        async fn request(&mut self, command: &str, arguments: Option<Value>) -> Value {
            self.seq += 1;
            let flow = self
                .dispatcher
                .dispatch(Request::new(self.seq, command, arguments))
                .await;
            assert_eq!(flow, Flow::Continue);
            loop {
                let message = self.frames.read_frame().await.unwrap().unwrap();
                if message["type"] == "response" {
                    assert_eq!(message["request_seq"], self.seq);
                    return message;
                }
            }
        }

        async fn launch(&mut self, stop_on_entry: bool) {
            self.request("initialize", None).await;
            let args = json!({"mode": "exec", "program": "/bin/wedged", "stopOnEntry": stop_on_entry});
            let resp = self.request("launch", Some(args)).await;
            assert_eq!(resp["success"], true, "{resp}");
        }
    }

    #[tokio::test]
    async fn failed_continue_while_running_stays_running() {
        let mut harness = Harness::new();
        harness.launch(false).await;

        let resp = harness.request("configurationDone", None).await;
        assert_eq!(resp["body"]["error"]["id"], 3002);
        assert_eq!(harness.context.state().await, SessionState::Running);

        let resp = harness.request("continue", Some(json!({"threadId": 1}))).await;
        assert_eq!(resp["success"], false);
        assert_eq!(resp["body"]["error"]["id"], 3002);
        assert_eq!(harness.context.state().await, SessionState::Running);
    }

    #[tokio::test]
    async fn failed_continue_from_stop_returns_to_stopped() {
        let mut harness = Harness::new();
        harness.launch(true).await;

        let resp = harness.request("configurationDone", None).await;
        assert_eq!(resp["success"], true);
        assert_eq!(harness.context.state().await, SessionState::Stopped);

        let resp = harness.request("continue", Some(json!({"threadId": 1}))).await;
        assert_eq!(resp["body"]["error"]["id"], 3002);
        assert_eq!(
            resp["body"]["error"]["format"],
            "Unable to continue: tracer is busy"
        );
        assert_eq!(harness.context.state().await, SessionState::Stopped);
    }

    #[tokio::test]
    async fn breakpoints_are_placed_off_the_async_workers() {
        let mut harness = Harness::new();
        harness.launch(false).await;

        let args = json!({"source": {"path": "/src/main.rs"}, "breakpoints": [{"line": 3}, {"line": 5}]});
        let resp = harness.request("setBreakpoints", Some(args)).await;
        let lines: Vec<i64> = resp["body"]["breakpoints"]
            .as_array()
            .unwrap()
            .iter()
            .map(|bp| bp["line"].as_i64().unwrap())
            .collect();
        assert_eq!(lines, vec![3, 5]);
        // The debuggee went back into its slot.
        assert!(harness.context.debuggee.lock().await.is_some());
        assert_eq!(harness.context.state().await, SessionState::AwaitingLaunch);
    }

    #[tokio::test]
    async fn undecodable_command_closes_without_response() {
        let mut harness = Harness::new();
        let flow = harness
            .dispatcher
            .dispatch(Request::new(1, "unknown", None))
            .await;
        assert_eq!(flow, Flow::Close);

        // A known but unhandled command still gets an error response.
        let resp = harness.request("threads", None).await;
        assert_eq!(resp["seq"], 1);
        assert_eq!(resp["body"]["error"]["id"], 9999);
    }
}
