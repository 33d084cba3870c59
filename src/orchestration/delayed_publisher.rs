//! # Delayed Publisher
//!
//! Non-blocking re-enqueue. Each scheduled publish runs on its own tokio task
//! that sleeps and then publishes, so the worker that asked for it has
//! already released its execution slot. Shutdown cancels every pending
//! publish; those tasks stay PENDING in the store and startup recovery picks
//! them up again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::messaging::{PriorityChannelSet, TaskMessage};

#[derive(Clone)]
pub struct DelayedPublisher {
    channels: PriorityChannelSet,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for DelayedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedPublisher")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl DelayedPublisher {
    pub fn new(channels: PriorityChannelSet) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            channels,
            shutdown_tx: Arc::new(shutdown_tx),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish `message` on its tier after `delay`. Must be called from
    /// within a tokio runtime.
    pub fn schedule(&self, message: TaskMessage, delay: Duration) {
        if *self.shutdown_tx.borrow() {
            debug!(task_id = %message.task_id, "Publisher stopped, delayed publish dropped");
            return;
        }

        let channels = self.channels.clone();
        let pending = Arc::clone(&self.pending);
        let mut shutdown = self.shutdown_tx.subscribe();
        pending.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let task_id = message.task_id.clone();
                    if let Err(e) = channels.publish(message).await {
                        warn!(task_id = %task_id, error = %e, "Delayed publish failed, task left for recovery");
                    }
                }
                _ = stopped(&mut shutdown) => {
                    debug!(task_id = %message.task_id, "Delayed publish cancelled by shutdown");
                }
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Scheduled publishes that have neither fired nor been cancelled
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cancel every pending publish and refuse new ones
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Resolve once the shutdown flag is set. The borrow guard from `wait_for`
/// is dropped here so callers can hold this future across other awaits in a
/// spawned task.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|flag| *flag).await;
}
