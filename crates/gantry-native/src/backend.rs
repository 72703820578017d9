/// ptrace-based engine for Linux x86_64 executables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use linux::NativeDebuggee;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod linux {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};

    use gantry_dap::engine::{
        Backend, BreakpointHandle, Debuggee, EngineError, LaunchSpec, NotificationSender,
        Placement, StopCause, StopReport,
    };
    use nix::unistd::Pid;
    use tracing::debug;

    use super::NativeBackend;
    use crate::error::NativeError;
    use crate::tracer::{self, Request, THREAD_ID};

    impl Backend for NativeBackend {
        fn launch(
            &self,
            spec: &LaunchSpec,
            notifications: NotificationSender,
        ) -> Result<Box<dyn Debuggee>, EngineError> {
            let started = tracer::spawn(spec.clone(), notifications)?;
            Ok(Box::new(NativeDebuggee {
                pid: started.pid,
                exited: started.exited,
                requests: started.requests,
            }))
        }
    }

    /// Client side of a tracer thread.
    pub struct NativeDebuggee {
        pid: Pid,
        exited: Arc<AtomicBool>,
        requests: mpsc::Sender<Request>,
    }

    impl NativeDebuggee {
        pub fn pid(&self) -> i32 {
            self.pid.as_raw()
        }

        pub fn has_exited(&self) -> bool {
            self.exited.load(Ordering::Acquire)
        }

        /// Read `len` bytes of debuggee memory.
        pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, NativeError> {
            self.call(|reply| Request::ReadMemory { addr, len, reply })?
        }

        /// Write `data` into writable debuggee memory.
        pub fn write_memory(&self, addr: u64, data: &[u8]) -> Result<(), NativeError> {
            let data = data.to_vec();
            self.call(|reply| Request::WriteMemory { addr, data, reply })?
        }

        fn call<T>(
            &self,
            request: impl FnOnce(mpsc::Sender<T>) -> Request,
        ) -> Result<T, NativeError> {
            let (reply, response) = mpsc::channel();
            self.requests
                .send(request(reply))
                .map_err(|_| NativeError::TracerGone)?;
            response.recv().map_err(|_| NativeError::TracerGone)
        }
    }

    impl Debuggee for NativeDebuggee {
        fn entry_stop(&self) -> StopReport {
            StopReport {
                thread_id: THREAD_ID,
                all_threads_stopped: true,
                cause: StopCause::Entry,
            }
        }

        fn set_breakpoint(&mut self, file: &Path, line: i64) -> Placement {
            let file = file.to_path_buf();
            self.call(|reply| Request::SetBreakpoint { file, line, reply })
                .unwrap_or_else(|e| Placement::Unverified {
                    reason: e.to_string(),
                })
        }

        fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), EngineError> {
            Ok(self.call(|reply| Request::RemoveBreakpoint { handle, reply })??)
        }

        fn resume(&mut self) -> Result<(), EngineError> {
            Ok(self.call(|reply| Request::Resume { reply })??)
        }

        fn kill(&mut self) -> Result<(), EngineError> {
            if self.requests.send(Request::Kill).is_err() {
                debug!(pid = %self.pid, "tracer already gone");
            }
            Ok(())
        }
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
impl gantry_dap::Backend for NativeBackend {
    fn launch(
        &self,
        _spec: &gantry_dap::LaunchSpec,
        _notifications: gantry_dap::engine::NotificationSender,
    ) -> Result<Box<dyn gantry_dap::Debuggee>, gantry_dap::EngineError> {
        Err(crate::error::NativeError::Unsupported.into())
    }
}
