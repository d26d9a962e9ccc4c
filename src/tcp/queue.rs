//! Serialized outbound command queue.
//!
//! A single worker drains the queue in strict FIFO order with at most one
//! send in flight. After every successful write the worker holds the
//! configured inter-command delay before completing the item, because the
//! receiving device cannot process back-to-back commands; the delay paces
//! the next send, not just the acknowledgment.

use std::sync::Arc;

use futures::SinkExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::types::{EiscpError, Event, Result};

use super::session::Shared;

/// One queued command: raw message text plus its completion channel.
pub(crate) struct QueueItem {
    pub raw: String,
    pub ack: oneshot::Sender<Result<()>>,
}

/// Spawn the queue worker and return the submission handle.
///
/// The worker exits once every submission handle is dropped.
pub(crate) fn spawn_worker(shared: Arc<Shared>) -> mpsc::UnboundedSender<QueueItem> {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            process(&shared, item).await;
        }
        debug!("command queue worker stopped");
    });
    tx
}

/// Send one item, enforcing the not-connected fast-fail and the
/// inter-command delay.
async fn process(shared: &Shared, item: QueueItem) {
    let mut writer = shared.writer.lock().await;
    let Some(sink) = writer.as_mut() else {
        drop(writer);
        error!(command = %item.raw, "dropping command, no active session");
        shared.emit(Event::Error(format!(
            "cannot send {:?}: not connected",
            item.raw
        )));
        let _ = item.ack.send(Err(EiscpError::NotConnected));
        return;
    };

    let sent = sink.send(item.raw.clone()).await;
    match sent {
        Ok(()) => {
            drop(writer);
            debug!(command = %item.raw, "sent");
            let delay = shared.send_delay();
            sleep(delay).await;
            let _ = item.ack.send(Ok(()));
        }
        Err(e) => {
            // A failed write means the transport is gone; tear it down so the
            // session runs its normal close path.
            *writer = None;
            drop(writer);
            shared.cancel_connection();
            error!(command = %item.raw, error = %e, "send failed");
            shared.emit(Event::Error(format!("send {:?} failed: {e}", item.raw)));
            let _ = item.ack.send(Err(e));
        }
    }
}
