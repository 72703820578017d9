//! State shared by one session's request loop, event forwarder and teardown.

use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::engine::Debuggee;
use crate::outbound::Outbound;
use crate::session::{SessionLifecycle, SessionState};

pub struct SessionContext {
    pub outbound: Outbound,
    pub lifecycle: Mutex<SessionLifecycle>,
    pub debuggee: Mutex<Option<Box<dyn Debuggee>>>,
    /// Binary built for this session, if any.
    pub artifact: Mutex<Option<PathBuf>>,
}

impl SessionContext {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            lifecycle: Mutex::new(SessionLifecycle::new()),
            debuggee: Mutex::new(None),
            artifact: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.lifecycle.lock().await.state()
    }
}
