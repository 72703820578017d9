//! Forwarding engine notifications to the client as DAP events.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::SessionContext;
use crate::engine::{Notification, NotificationReceiver, StopCause, StopReport};
use crate::protocol::{
    Event, OutputEventBody, StopReason, StoppedEventBody, TerminatedEventBody,
};
use crate::teardown::{wait_true, Teardown};

/// Build a `stopped` event for `report` with an explicit reason.
pub fn stopped_event(reason: StopReason, report: &StopReport) -> Event {
    let description = match report.cause {
        StopCause::Signal(signo) => Some(format!("signal {signo}")),
        _ => None,
    };
    Event::with_body(
        "stopped",
        &StoppedEventBody {
            reason,
            description,
            thread_id: Some(report.thread_id),
            all_threads_stopped: Some(report.all_threads_stopped),
        },
    )
}

fn stop_reason(cause: StopCause) -> StopReason {
    match cause {
        StopCause::Entry => StopReason::Entry,
        StopCause::Breakpoint => StopReason::Breakpoint,
        StopCause::Step => StopReason::Step,
        StopCause::Pause => StopReason::Pause,
        StopCause::Signal(_) => StopReason::Exception,
    }
}

/// Spawn the forwarder for one debuggee.
///
/// It runs until the notification channel closes or teardown fires. It
/// only touches the lifecycle and the outbound channel.
pub fn spawn_forwarder(
    mut notifications: NotificationReceiver,
    context: Arc<SessionContext>,
    teardown: Arc<Teardown>,
    terminate_grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut closed = teardown.subscribe();
        loop {
            let notification = tokio::select! {
                biased;
                _ = wait_true(&mut closed) => break,
                next = notifications.recv() => match next {
                    Some(notification) => notification,
                    None => break,
                },
            };
            forward(&context, &teardown, terminate_grace, notification).await;
        }
        debug!("event forwarder finished");
    })
}

async fn forward(
    context: &SessionContext,
    teardown: &Arc<Teardown>,
    terminate_grace: Duration,
    notification: Notification,
) {
    let mut exited = false;
    let event = match notification {
        Notification::Stopped(report) => {
            if let Err(e) = context.lifecycle.lock().await.handle_stopped() {
                debug!("dropping stop notification: {e}");
                return;
            }
            stopped_event(stop_reason(report.cause), &report)
        }
        Notification::Exited { exit_code } => {
            info!(exit_code, "debuggee exited");
            if let Err(e) = context.lifecycle.lock().await.handle_terminated() {
                debug!("dropping exit notification: {e}");
                return;
            }
            exited = true;
            Event::with_body("terminated", &TerminatedEventBody::default())
        }
        Notification::Output { category, text } => Event::with_body(
            "output",
            &OutputEventBody {
                category: Some(category.as_str().to_string()),
                output: text,
            },
        ),
    };
    if let Err(e) = context.outbound.emit(event).await {
        debug!("event not delivered: {e}");
    }
    if exited {
        teardown.stop_after(terminate_grace);
    }
}
