//! Single-shot session teardown.
//!
//! Teardown can be triggered by a `disconnect` request, client EOF, a
//! protocol violation, debuggee exit or server shutdown. Whichever comes
//! first runs the body; later triggers are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::launch::remove_artifact;

pub struct Teardown {
    context: Arc<SessionContext>,
    fired: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Teardown {
    pub fn new(context: Arc<SessionContext>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            context,
            fired: AtomicBool::new(false),
            closed,
        }
    }

    /// Run teardown. Returns `true` only for the call that did the work.
    ///
    /// Kills the debuggee, removes any built binary, closes the transport
    /// and marks the session Disconnected.
    pub async fn stop(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!("tearing down session");

        if let Some(mut debuggee) = self.context.debuggee.lock().await.take() {
            if let Err(e) = debuggee.kill() {
                debug!("kill debuggee: {e}");
            }
        }
        if let Some(path) = self.context.artifact.lock().await.take() {
            remove_artifact(&path);
        }
        self.context.outbound.close().await;
        self.context.lifecycle.lock().await.disconnect();
        self.closed.send_replace(true);
        true
    }

    /// Run teardown after `grace` unless something else runs it first.
    pub fn stop_after(self: &Arc<Self>, grace: Duration) {
        let teardown = Arc::clone(self);
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            if teardown.stop().await {
                debug!(grace_ms = grace.as_millis() as u64, "teardown after debuggee exit");
            }
        });
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Observe completion; the value turns `true` once teardown has run.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Resolve once `rx` reports `true`; never resolves if the sender is gone.
pub(crate) async fn wait_true(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|v| *v).await.is_err() {
        std::future::pending::<()>().await;
    }
}
