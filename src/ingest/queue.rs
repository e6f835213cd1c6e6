//! In-process work queue between request handlers and the worker.
//!
//! Many producers, one consumer. Items are handed over through an unbounded
//! tokio channel, so `enqueue` never waits and never drops an item while the
//! consumer is alive. Nothing is persisted: whatever is queued when the
//! process exits is lost.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::WorkItem;

/// Errors that can occur with the work queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Work queue is closed; item for {0} was not enqueued")]
    Closed(String),
}

/// Create a connected producer/consumer pair
pub fn work_queue() -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));

    (
        WorkQueue {
            tx,
            depth: depth.clone(),
        },
        WorkReceiver { rx, depth },
    )
}

/// Producer side. Cheap to clone; one clone per request handler is fine.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueue {
    /// Append an item at the tail. Fails only if the worker is gone.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        // Count before sending so the consumer never decrements below zero
        self.depth.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed(item.audio_ref.to_string()));
        }

        Ok(())
    }

    /// Items enqueued but not yet taken by the worker
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the single worker
#[derive(Debug)]
pub struct WorkReceiver {
    rx: mpsc::UnboundedReceiver<WorkItem>,
    depth: Arc<AtomicUsize>,
}

impl WorkReceiver {
    /// Wait for the next item in arrival order.
    ///
    /// Returns `None` once every producer has been dropped and the queue is
    /// empty.
    pub async fn dequeue(&mut self) -> Option<WorkItem> {
        let item = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// Non-blocking variant of [`dequeue`](Self::dequeue)
    pub fn try_dequeue(&mut self) -> Option<WorkItem> {
        let item = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}
