//! Shared harness: a scripted engine, a fake builder and a DAP test client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gantry_dap::builder::{BuildKind, Builder};
use gantry_dap::engine::{
    Backend, BreakpointHandle, Debuggee, EngineError, LaunchSpec, Notification,
    NotificationSender, OutputCategory, Placement, StopCause, StopReport,
};
use gantry_dap::transport::{encode_message, FrameReader};
use gantry_dap::{Server, ServerHandle, ServerOptions};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// The only line of the fixture source that holds code.
pub const VALID_LINE: i64 = 8;
/// A line past the end of the fixture source.
pub const INVALID_LINE: i64 = 100;
/// How many times a run of the fixture passes `VALID_LINE`.
pub const HITS_PER_RUN: usize = 2;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

// ── Scripted engine ────────────────────────────────────────────

/// What the engine was asked to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub launched: Vec<PathBuf>,
    pub placed: Vec<i64>,
    pub removed: Vec<BreakpointHandle>,
    pub resumes: usize,
    pub kills: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    pub log: Arc<Mutex<EngineLog>>,
}

impl Backend for ScriptedBackend {
    fn launch(
        &self,
        spec: &LaunchSpec,
        notifications: NotificationSender,
    ) -> Result<Box<dyn Debuggee>, EngineError> {
        let meta = std::fs::metadata(&spec.program)?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into());
        }
        self.log.lock().unwrap().launched.push(spec.program.clone());
        Ok(Box::new(ScriptedDebuggee {
            log: Arc::clone(&self.log),
            notifications,
            breakpoints: HashMap::new(),
            next_handle: 0,
            hits_left: HITS_PER_RUN,
            running: false,
        }))
    }
}

/// Runs a pretend program that passes `VALID_LINE` a fixed number of
/// times and then exits.
struct ScriptedDebuggee {
    log: Arc<Mutex<EngineLog>>,
    notifications: NotificationSender,
    breakpoints: HashMap<BreakpointHandle, i64>,
    next_handle: u64,
    hits_left: usize,
    running: bool,
}

impl Debuggee for ScriptedDebuggee {
    fn entry_stop(&self) -> StopReport {
        StopReport {
            thread_id: 1,
            all_threads_stopped: true,
            cause: StopCause::Entry,
        }
    }

    fn set_breakpoint(&mut self, _file: &Path, line: i64) -> Placement {
        self.log.lock().unwrap().placed.push(line);
        if line != VALID_LINE {
            return Placement::Unverified {
                reason: format!("could not find statement at line {line}"),
            };
        }
        self.next_handle += 1;
        let handle = BreakpointHandle(self.next_handle);
        self.breakpoints.insert(handle, line);
        Placement::Verified { handle, line }
    }

    fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), EngineError> {
        self.log.lock().unwrap().removed.push(handle);
        self.breakpoints.remove(&handle);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        if self.running {
            return Ok(());
        }
        self.log.lock().unwrap().resumes += 1;
        let armed = self.breakpoints.values().any(|l| *l == VALID_LINE);
        if armed && self.hits_left > 0 {
            self.hits_left -= 1;
            let _ = self.notifications.send(Notification::Stopped(StopReport {
                thread_id: 1,
                all_threads_stopped: true,
                cause: StopCause::Breakpoint,
            }));
        } else {
            self.running = true;
            let _ = self.notifications.send(Notification::Output {
                category: OutputCategory::Stdout,
                text: "done\n".into(),
            });
            let _ = self.notifications.send(Notification::Exited { exit_code: 0 });
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), EngineError> {
        self.log.lock().unwrap().kills += 1;
        Ok(())
    }
}

/// Builds by writing a small executable file, if `source` is a directory.
#[derive(Clone, Default)]
pub struct ScriptedBuilder {
    pub builds: Arc<Mutex<Vec<(BuildKind, PathBuf)>>>,
}

impl Builder for ScriptedBuilder {
    fn build(&self, kind: BuildKind, source: &Path, output: &Path) -> Result<PathBuf, String> {
        if !source.is_dir() {
            return Err(format!(
                "error: manifest path `{}` does not exist",
                source.join("Cargo.toml").display()
            ));
        }
        std::fs::write(output, b"#!/bin/sh\n").map_err(|e| e.to_string())?;
        std::fs::set_permissions(output, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| e.to_string())?;
        self.builds
            .lock()
            .unwrap()
            .push((kind, output.to_path_buf()));
        Ok(output.to_path_buf())
    }
}

// ── Fixture and server ─────────────────────────────────────────

/// On-disk layout standing in for a compiled test program.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    /// Prebuilt executable.
    pub path: PathBuf,
    /// Its source file.
    pub source: PathBuf,
    /// A buildable package directory.
    pub package: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("increment");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let package = dir.path().join("pkg");
        std::fs::create_dir_all(package.join("src")).unwrap();
        let source = package.join("src").join("main.rs");
        std::fs::write(&source, "fn main() {}\n").unwrap();
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o644)).unwrap();

        Self {
            dir,
            path,
            source,
            package,
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub task: JoinHandle<()>,
    pub backend: ScriptedBackend,
    pub builder: ScriptedBuilder,
    pub fixture: Fixture,
}

impl TestServer {
    pub async fn start(mut options: ServerOptions) -> Self {
        let fixture = Fixture::new();
        options.default_output = fixture.dir.path().join("__debug_bin");
        let backend = ScriptedBackend::default();
        let builder = ScriptedBuilder::default();
        let server = Server::bind(
            "127.0.0.1:0",
            options,
            Arc::new(backend.clone()),
            Arc::new(builder.clone()),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let task = tokio::spawn(async move {
            server.run().await.unwrap();
        });
        Self {
            addr,
            handle,
            task,
            backend,
            builder,
            fixture,
        }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    pub fn engine(&self) -> std::sync::MutexGuard<'_, EngineLog> {
        self.backend.log.lock().unwrap()
    }

    pub async fn stop(self) {
        self.handle.stop();
        let _ = tokio::time::timeout(READ_TIMEOUT, self.task).await;
    }
}

// ── Client ─────────────────────────────────────────────────────

/// A minimal DAP client that records every `seq` it receives.
pub struct TestClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    seq: i64,
    pub received_seqs: Vec<i64>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: FrameReader::new(read),
            writer: write,
            seq: 0,
            received_seqs: Vec::new(),
        }
    }

    /// Send a request and return the `seq` it carried.
    pub async fn send(&mut self, command: &str, arguments: Option<Value>) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        let mut msg = json!({"seq": seq, "type": "request", "command": command});
        if let Some(args) = arguments {
            msg["arguments"] = args;
        }
        self.send_raw(&encode_message(&msg)).await;
        seq
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next message, or `None` once the server has closed the stream.
    pub async fn read_message(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(READ_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a message")
            .expect("transport error");
        if let Some(msg) = &frame {
            self.received_seqs.push(msg["seq"].as_i64().unwrap());
        }
        frame
    }

    /// Like [`read_message`](Self::read_message), but a reset connection
    /// also counts as closed.
    pub async fn read_until_closed(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(READ_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a message")
            .ok()
            .flatten();
        if let Some(msg) = &frame {
            self.received_seqs.push(msg["seq"].as_i64().unwrap());
        }
        frame
    }

    pub async fn expect_message(&mut self) -> Value {
        self.read_message()
            .await
            .expect("server closed the connection")
    }

    pub async fn expect_response(&mut self, command: &str) -> Value {
        let msg = self.expect_message().await;
        assert_eq!(msg["type"], "response", "got {msg}");
        assert_eq!(msg["command"], command, "got {msg}");
        assert_eq!(msg["success"], true, "got {msg}");
        msg
    }

    pub async fn expect_error_response(&mut self, command: &str) -> Value {
        let msg = self.expect_message().await;
        assert_eq!(msg["type"], "response", "got {msg}");
        assert_eq!(msg["command"], command, "got {msg}");
        assert_eq!(msg["success"], false, "got {msg}");
        msg
    }

    pub async fn expect_event(&mut self, event: &str) -> Value {
        let msg = self.expect_message().await;
        assert_eq!(msg["type"], "event", "got {msg}");
        assert_eq!(msg["event"], event, "got {msg}");
        msg
    }

    /// Read until a response to `command` and an `event` have both arrived,
    /// in either order. Output events are skipped.
    pub async fn expect_response_and_event(&mut self, command: &str, event: &str) -> (Value, Value) {
        let mut response = None;
        let mut found = None;
        while response.is_none() || found.is_none() {
            let msg = self.expect_message().await;
            if msg["type"] == "response" {
                assert_eq!(msg["command"], command, "got {msg}");
                assert_eq!(msg["success"], true, "got {msg}");
                response = Some(msg);
            } else if msg["event"] == event {
                found = Some(msg);
            } else {
                assert_eq!(msg["event"], "output", "unexpected {msg}");
            }
        }
        (response.unwrap(), found.unwrap())
    }

    /// Skip output events until the next other message.
    pub async fn next_non_output(&mut self) -> Option<Value> {
        loop {
            let msg = self.read_message().await?;
            if msg["event"] != "output" {
                return Some(msg);
            }
        }
    }

    // ── Request builders ───────────────────────────────────────

    pub async fn initialize_request(&mut self) -> i64 {
        self.send(
            "initialize",
            Some(json!({
                "clientID": "gantry-tests",
                "adapterID": "gantry",
                "linesStartAt1": true,
                "columnsStartAt1": true,
                "pathFormat": "path"
            })),
        )
        .await
    }

    pub async fn launch_request(&mut self, mode: &str, program: &Path, stop_on_entry: bool) -> i64 {
        self.launch_request_with_args(json!({
            "request": "launch",
            "mode": mode,
            "program": program.to_string_lossy(),
            "stopOnEntry": stop_on_entry
        }))
        .await
    }

    pub async fn launch_request_with_args(&mut self, args: Value) -> i64 {
        self.send("launch", Some(args)).await
    }

    pub async fn set_breakpoints_request(&mut self, file: &Path, lines: &[i64]) -> i64 {
        let breakpoints: Vec<Value> = lines.iter().map(|l| json!({"line": l})).collect();
        self.send(
            "setBreakpoints",
            Some(json!({
                "source": {"path": file.to_string_lossy()},
                "breakpoints": breakpoints
            })),
        )
        .await
    }

    pub async fn set_exception_breakpoints_request(&mut self) -> i64 {
        self.send("setExceptionBreakpoints", Some(json!({"filters": []})))
            .await
    }

    pub async fn configuration_done_request(&mut self) -> i64 {
        self.send("configurationDone", None).await
    }

    pub async fn continue_request(&mut self, thread_id: i64) -> i64 {
        self.send("continue", Some(json!({"threadId": thread_id})))
            .await
    }

    pub async fn disconnect_request(&mut self) -> i64 {
        self.send("disconnect", Some(json!({"terminateDebuggee": true})))
            .await
    }
}
