//! The single path by which messages reach the client.
//!
//! Responses from the request loop and events from the forwarder share one
//! framed writer. `seq` is stamped while the writer lock is held, so wire
//! order and sequence order agree.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DapError;
use crate::protocol::{Event, Response};
use crate::sequencer::{SeqMode, Sequencer};
use crate::transport::FrameWriter;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Outbound {
    writer: Mutex<FrameWriter<BoxedWriter>>,
    sequencer: Sequencer,
    closed: AtomicBool,
}

impl Outbound {
    pub fn new(writer: BoxedWriter, mode: SeqMode) -> Self {
        Self {
            writer: Mutex::new(FrameWriter::new(writer)),
            sequencer: Sequencer::new(mode),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn respond(&self, mut response: Response) -> Result<(), DapError> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(DapError::Closed);
        }
        response.seq = self.sequencer.next_seq();
        debug!(
            seq = response.seq,
            request_seq = response.request_seq,
            command = %response.command,
            success = response.success,
            "-> response"
        );
        writer.write_value(&to_value(&response)?).await
    }

    pub async fn emit(&self, mut event: Event) -> Result<(), DapError> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(DapError::Closed);
        }
        event.seq = self.sequencer.next_seq();
        debug!(seq = event.seq, event = %event.event, "-> event");
        writer.write_value(&to_value(&event)?).await
    }

    /// Shut the stream down. Later sends fail with [`DapError::Closed`].
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = writer.shutdown().await {
            debug!("transport shutdown: {e}");
        }
    }
}

fn to_value<T: Serialize>(message: &T) -> Result<serde_json::Value, DapError> {
    serde_json::to_value(message).map_err(|e| DapError::Transport(format!("serialize: {e}")))
}
