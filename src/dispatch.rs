//! Hand-off between the subscription front end and the fetch worker.
//!
//! [`channel`] creates a bounded queue. The sending half,
//! [`FetchDispatchQueue`], is cloned into every request handler; the
//! receiving half, [`FetchReceiver`], belongs to the fetch worker.
//!
//! Every non-empty [`FetchDispatchQueue::enqueue`] call becomes exactly one
//! [`FetchJob`] message. A batch is therefore either delivered whole or not
//! at all, and two batches submitted concurrently never interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::feed::FeedDescriptor;

/// Default number of batches that may wait for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
/// Default time `enqueue` waits for a free slot.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// The fetch worker could not take the batch. Nothing from the batch was
/// submitted, so the caller may retry it as-is.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FatalDispatchError {
    /// The worker has shut down
    #[error("fetch worker is not running")]
    Closed,
    /// The queue stayed full for the whole submit timeout
    #[error("fetch queue is full")]
    Saturated,
}

/// One enqueued batch, in the order the caller supplied it.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Monotonic per-queue id, for correlating logs
    pub batch_id: u64,
    pub feeds: Vec<FeedDescriptor>,
}

/// Sending half of the fetch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FetchDispatchQueue {
    tx: mpsc::Sender<FetchJob>,
    next_batch: Arc<AtomicU64>,
    submit_timeout: Duration,
}

/// Receiving half of the fetch queue.
#[derive(Debug)]
pub struct FetchReceiver {
    rx: mpsc::Receiver<FetchJob>,
}

/// Creates a queue holding at most `capacity` pending batches.
///
/// A `capacity` of zero is raised to one.
pub fn channel(capacity: usize) -> (FetchDispatchQueue, FetchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let queue = FetchDispatchQueue {
        tx,
        next_batch: Arc::new(AtomicU64::new(1)),
        submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
    };
    (queue, FetchReceiver { rx })
}

impl FetchDispatchQueue {
    /// Sets how long [`enqueue`](Self::enqueue) waits for capacity.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Submits `feeds` to the fetch worker as one job.
    ///
    /// Returns once the job is in the queue; it does not wait for any fetch.
    /// An empty batch is accepted and sends nothing.
    ///
    /// # Errors
    ///
    /// [`FatalDispatchError::Closed`] if the receiver is gone,
    /// [`FatalDispatchError::Saturated`] if no slot freed up within the submit
    /// timeout. Either way none of `feeds` was submitted.
    pub async fn enqueue(&self, feeds: Vec<FeedDescriptor>) -> Result<(), FatalDispatchError> {
        if feeds.is_empty() {
            return Ok(());
        }

        // Reserve first so the id is only consumed by batches that are sent
        let permit = match tokio::time::timeout(self.submit_timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                tracing::warn!(size = feeds.len(), "Fetch worker gone, batch not enqueued");
                return Err(FatalDispatchError::Closed);
            }
            Err(_) => {
                tracing::warn!(
                    size = feeds.len(),
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Fetch queue saturated, batch not enqueued"
                );
                return Err(FatalDispatchError::Saturated);
            }
        };

        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(batch_id = batch_id, size = feeds.len(), "Batch enqueued");
        permit.send(FetchJob { batch_id, feeds });
        Ok(())
    }

    /// True once the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FetchReceiver {
    /// Waits for the next job. Returns `None` once every queue handle has
    /// been dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<FetchJob> {
        self.rx.recv().await
    }

    /// Takes a job if one is already waiting.
    pub fn try_recv(&mut self) -> Option<FetchJob> {
        self.rx.try_recv().ok()
    }
}
