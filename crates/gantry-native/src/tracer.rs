//! The tracer thread.
//!
//! ptrace requests are only accepted from the thread that started the
//! tracee, so each debuggee gets one OS thread that spawns the process and
//! then serves [`Request`]s until the process is gone.

use std::collections::HashMap;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gantry_dap::engine::{
    BreakpointHandle, LaunchSpec, Notification, NotificationSender, OutputCategory, Placement,
    StopCause, StopReport,
};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::breakpoint::SoftwareBreakpoint;
use crate::error::NativeError;
use crate::line_table::LineTable;
use crate::memory::{read_memory, write_memory};

/// How often a running tracee is polled for status changes.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long an exit waits for buffered output to be forwarded.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

/// The only thread reported to clients.
pub(crate) const THREAD_ID: i64 = 1;

pub(crate) enum Request {
    SetBreakpoint {
        file: PathBuf,
        line: i64,
        reply: mpsc::Sender<Placement>,
    },
    RemoveBreakpoint {
        handle: BreakpointHandle,
        reply: mpsc::Sender<Result<(), NativeError>>,
    },
    Resume {
        reply: mpsc::Sender<Result<(), NativeError>>,
    },
    ReadMemory {
        addr: u64,
        len: usize,
        reply: mpsc::Sender<Result<Vec<u8>, NativeError>>,
    },
    WriteMemory {
        addr: u64,
        data: Vec<u8>,
        reply: mpsc::Sender<Result<(), NativeError>>,
    },
    Kill,
}

/// Handle returned once the tracee is parked at its first instruction.
pub(crate) struct Started {
    pub pid: Pid,
    pub exited: Arc<AtomicBool>,
    pub requests: mpsc::Sender<Request>,
}

/// Start the tracer thread and wait until the tracee is stopped at exec.
pub(crate) fn spawn(spec: LaunchSpec, notifications: NotificationSender) -> Result<Started, NativeError> {
    let (requests, inbox) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();

    std::thread::Builder::new()
        .name("gantry-tracer".into())
        .spawn(move || {
            let tracer = match Tracer::start(&spec, notifications) {
                Ok(tracer) => tracer,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok((tracer.pid, Arc::clone(&tracer.exited))));
            tracer.serve(inbox);
        })?;

    let (pid, exited) = ready_rx.recv().map_err(|_| NativeError::TracerGone)??;
    Ok(Started {
        pid,
        exited,
        requests,
    })
}

struct Site {
    breakpoint: SoftwareBreakpoint,
    refs: usize,
}

struct Tracer {
    pid: Pid,
    /// Line table, or why breakpoints cannot be resolved.
    lines: Result<LineTable, String>,
    bias: u64,
    notifications: NotificationSender,
    handles: HashMap<BreakpointHandle, u64>,
    sites: HashMap<u64, Site>,
    next_handle: u64,
    running: bool,
    exited: Arc<AtomicBool>,
    pending_signal: Option<Signal>,
    output_done: mpsc::Receiver<()>,
    readers: usize,
}

impl Tracer {
    fn start(spec: &LaunchSpec, notifications: NotificationSender) -> Result<Self, NativeError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        // SAFETY: PTRACE_TRACEME is a single syscall, safe between fork and exec.
        unsafe {
            command.pre_exec(|| {
                ptrace::traceme()?;
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => return Err(NativeError::Exited),
            other => {
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                return Err(NativeError::UnexpectedStop(format!("{other:?}")));
            }
        }
        ptrace::setoptions(pid, ptrace::Options::PTRACE_O_EXITKILL)?;
        info!(%pid, program = %spec.program.display(), "debuggee stopped at exec");

        let (done_tx, output_done) = mpsc::channel();
        let mut readers = 0;
        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, OutputCategory::Stdout, notifications.clone(), done_tx.clone())?;
            readers += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, OutputCategory::Stderr, notifications.clone(), done_tx)?;
            readers += 1;
        }

        let (lines, bias) = match locate(pid, &spec.program) {
            Ok(located) => (Ok(located.0), located.1),
            Err(e) => {
                warn!(program = %spec.program.display(), "breakpoints unavailable: {e}");
                (Err(e.to_string()), 0)
            }
        };

        Ok(Self {
            pid,
            lines,
            bias,
            notifications,
            handles: HashMap::new(),
            sites: HashMap::new(),
            next_handle: 0,
            running: false,
            exited: Arc::new(AtomicBool::new(false)),
            pending_signal: None,
            output_done,
            readers,
        })
    }

    fn serve(mut self, inbox: mpsc::Receiver<Request>) {
        loop {
            let request = if self.running {
                self.poll();
                match inbox.recv_timeout(POLL_INTERVAL) {
                    Ok(request) => request,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match inbox.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                }
            };
            if !self.handle(request) {
                break;
            }
        }
        self.kill();
        debug!(pid = %self.pid, "tracer finished");
    }

    /// Returns `false` once the tracer should stop.
    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::SetBreakpoint { file, line, reply } => {
                let _ = reply.send(self.set_breakpoint(&file, line));
            }
            Request::RemoveBreakpoint { handle, reply } => {
                let _ = reply.send(self.remove_breakpoint(handle));
            }
            Request::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Request::ReadMemory { addr, len, reply } => {
                let _ = reply.send(self.live().and_then(|pid| read_memory(pid, addr, len)));
            }
            Request::WriteMemory { addr, data, reply } => {
                let _ = reply.send(self.live().and_then(|pid| write_memory(pid, addr, &data)));
            }
            Request::Kill => return false,
        }
        true
    }

    fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    fn live(&self) -> Result<Pid, NativeError> {
        if self.is_exited() {
            Err(NativeError::Exited)
        } else {
            Ok(self.pid)
        }
    }

    fn set_breakpoint(&mut self, file: &Path, line: i64) -> Placement {
        let pid = match self.live() {
            Ok(pid) => pid,
            Err(e) => return unverified(e.to_string()),
        };
        let table = match &self.lines {
            Ok(table) => table,
            Err(reason) => return unverified(reason.clone()),
        };
        let resolved = u64::try_from(line)
            .ok()
            .filter(|l| *l > 0)
            .and_then(|l| table.resolve(file, l));
        let Some(link_addr) = resolved else {
            return unverified(format!(
                "could not find statement at {}:{line}",
                file.display()
            ));
        };

        let addr = link_addr.wrapping_add(self.bias);
        let site = self.sites.entry(addr).or_insert_with(|| Site {
            breakpoint: SoftwareBreakpoint::new(addr),
            refs: 0,
        });
        if let Err(e) = site.breakpoint.enable(pid) {
            let unused = site.refs == 0;
            if unused {
                self.sites.remove(&addr);
            }
            return unverified(format!("cannot insert breakpoint at {addr:#x}: {e}"));
        }
        site.refs += 1;

        self.next_handle += 1;
        let handle = BreakpointHandle(self.next_handle);
        self.handles.insert(handle, addr);
        debug!(file = %file.display(), line, addr = format_args!("{addr:#x}"), "breakpoint inserted");
        Placement::Verified { handle, line }
    }

    fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), NativeError> {
        let Some(addr) = self.handles.remove(&handle) else {
            return Ok(());
        };
        let Some(site) = self.sites.get_mut(&addr) else {
            return Ok(());
        };
        site.refs = site.refs.saturating_sub(1);
        if site.refs > 0 {
            return Ok(());
        }
        if let Some(mut site) = self.sites.remove(&addr) {
            if !self.is_exited() {
                site.breakpoint.disable(self.pid)?;
            }
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), NativeError> {
        let pid = self.live()?;
        if self.running {
            return Ok(());
        }
        let mut signal = self.pending_signal.take();
        let pc = ptrace::getregs(pid)?.rip;
        let on_breakpoint = self
            .sites
            .get(&pc)
            .is_some_and(|site| site.breakpoint.is_enabled());

        if on_breakpoint {
            self.set_site_enabled(pc, false)?;
            ptrace::step(pid, signal.take())?;
            let status = waitpid(pid, None)?;
            if matches!(status, WaitStatus::Stopped(..)) {
                self.set_site_enabled(pc, true)?;
            }
            if !matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP)) {
                self.running = true;
                self.on_status(status);
                return Ok(());
            }
        }

        ptrace::cont(pid, signal)?;
        self.running = true;
        Ok(())
    }

    fn set_site_enabled(&mut self, addr: u64, enabled: bool) -> Result<(), NativeError> {
        let pid = self.pid;
        match self.sites.get_mut(&addr) {
            Some(site) if enabled => site.breakpoint.enable(pid),
            Some(site) => site.breakpoint.disable(pid),
            None => Ok(()),
        }
    }

    fn poll(&mut self) {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => self.on_status(status),
            Err(Errno::ECHILD) => {
                warn!(pid = %self.pid, "debuggee vanished");
                self.on_exit(-1);
            }
            Err(e) => warn!(pid = %self.pid, "waitpid: {e}"),
        }
    }

    fn on_status(&mut self, status: WaitStatus) {
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => self.on_trap(),
            WaitStatus::Stopped(_, sig) if is_fault(sig) => {
                self.running = false;
                self.pending_signal = Some(sig);
                self.report(StopCause::Signal(sig as i32));
            }
            WaitStatus::Stopped(_, sig) => {
                if let Err(e) = ptrace::cont(self.pid, sig) {
                    warn!(pid = %self.pid, "pass {sig} through: {e}");
                }
            }
            WaitStatus::Exited(_, code) => self.on_exit(i64::from(code)),
            WaitStatus::Signaled(_, sig, _) => self.on_exit(128 + sig as i64),
            other => {
                debug!(?other, "ignoring stop");
                if let Err(e) = ptrace::cont(self.pid, None) {
                    warn!(pid = %self.pid, "continue after {other:?}: {e}");
                }
            }
        }
    }

    fn on_trap(&mut self) {
        let mut regs = match ptrace::getregs(self.pid) {
            Ok(regs) => regs,
            Err(e) => {
                warn!(pid = %self.pid, "getregs: {e}");
                return;
            }
        };
        let addr = regs.rip.wrapping_sub(1);
        let hit = self
            .sites
            .get(&addr)
            .is_some_and(|site| site.breakpoint.is_enabled());
        if !hit {
            if let Err(e) = ptrace::cont(self.pid, None) {
                warn!(pid = %self.pid, "continue after stray trap: {e}");
            }
            return;
        }

        regs.rip = addr;
        if let Err(e) = ptrace::setregs(self.pid, regs) {
            warn!(pid = %self.pid, "rewind pc: {e}");
        }
        self.running = false;
        self.report(StopCause::Breakpoint);
    }

    fn on_exit(&mut self, exit_code: i64) {
        self.running = false;
        self.exited.store(true, Ordering::Release);
        info!(pid = %self.pid, exit_code, "debuggee exited");

        let deadline = Instant::now() + OUTPUT_DRAIN;
        while self.readers > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if self.output_done.recv_timeout(left).is_err() {
                break;
            }
            self.readers -= 1;
        }
        let _ = self.notifications.send(Notification::Exited { exit_code });
    }

    fn report(&self, cause: StopCause) {
        debug!(pid = %self.pid, ?cause, "debuggee stopped");
        let _ = self.notifications.send(Notification::Stopped(StopReport {
            thread_id: THREAD_ID,
            all_threads_stopped: true,
            cause,
        }));
    }

    fn kill(&mut self) {
        if self.is_exited() {
            return;
        }
        if let Err(e) = signal::kill(self.pid, Signal::SIGKILL) {
            debug!(pid = %self.pid, "kill: {e}");
        }
        for _ in 0..8 {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        self.exited.store(true, Ordering::Release);
        info!(pid = %self.pid, "debuggee killed");
    }
}

fn unverified(reason: String) -> Placement {
    Placement::Unverified { reason }
}

fn is_fault(sig: Signal) -> bool {
    matches!(
        sig,
        Signal::SIGSEGV | Signal::SIGILL | Signal::SIGBUS | Signal::SIGFPE | Signal::SIGABRT
    )
}

/// Load the line table and compute the load bias of a PIE executable.
fn locate(pid: Pid, program: &Path) -> Result<(LineTable, u64), NativeError> {
    let table = LineTable::load(program)?;
    if !table.pie {
        return Ok((table, 0));
    }
    let canonical = program.canonicalize()?;
    let lowest = proc_maps::get_process_maps(pid.as_raw())?
        .iter()
        .filter(|map| map.filename() == Some(canonical.as_path()))
        .map(|map| map.start() as u64)
        .min()
        .ok_or_else(|| NativeError::NotMapped(canonical.clone()))?;
    let bias = lowest.wrapping_sub(table.base_vaddr & !0xfff);
    Ok((table, bias))
}

fn forward_output<R>(
    mut source: R,
    category: OutputCategory,
    notifications: NotificationSender,
    done: mpsc::Sender<()>,
) -> Result<(), NativeError>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("gantry-{}", category.as_str()))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            let mut decoder = Utf8Chunks::default();
            let send = |text: String| {
                text.is_empty()
                    || notifications
                        .send(Notification::Output { category, text })
                        .is_ok()
            };
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !send(decoder.push(&buf[..n])) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            send(decoder.finish());
            let _ = done.send(());
        })?;
    Ok(())
}

/// Decodes a byte stream into text without splitting a character that
/// straddles two reads.
#[derive(Debug, Default)]
struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    /// Text decoded so far. An incomplete trailing sequence is held back
    /// for the next call; invalid bytes become U+FFFD.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back once the stream has ended.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
