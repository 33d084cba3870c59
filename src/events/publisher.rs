use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::TaskId;
use crate::state_machine::TaskStatus;

/// Lifecycle transition as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

/// External subscriber fed every status event, e.g. a websocket bridge
pub trait StatusSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn deliver(&self, event: &StatusEvent) -> Result<(), PublishError>;
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Sink rejected event: {0}")]
    SinkRejected(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcasterStats {
    pub published: u64,
    pub sink_failures: u64,
    pub open_topics: usize,
}

/// Best-effort fan-out of status transitions to a global topic, a per-task
/// topic and any registered sinks.
///
/// Publishing never fails and never blocks: slow subscribers lag and miss
/// events, absent subscribers are ignored, and sink errors are only logged.
pub struct StatusBroadcaster {
    global: broadcast::Sender<StatusEvent>,
    topics: DashMap<TaskId, broadcast::Sender<StatusEvent>>,
    per_task_capacity: usize,
    sinks: RwLock<Vec<Arc<dyn StatusSink>>>,
    published: AtomicU64,
    sink_failures: AtomicU64,
}

impl std::fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(1000, 16)
    }
}

impl StatusBroadcaster {
    pub fn new(global_capacity: usize, per_task_capacity: usize) -> Self {
        let (global, _) = broadcast::channel(global_capacity.max(1));
        Self {
            global,
            topics: DashMap::new(),
            per_task_capacity: per_task_capacity.max(1),
            sinks: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn StatusSink>) {
        debug!(sink = sink.name(), "Registered status sink");
        self.sinks.write().push(sink);
    }

    /// Subscribe to every task's transitions
    pub fn subscribe_all(&self) -> broadcast::Receiver<StatusEvent> {
        self.global.subscribe()
    }

    /// Subscribe to one task's transitions. The topic closes after the task
    /// reaches a terminal status, and is dropped once every receiver is gone.
    pub fn subscribe_task(&self, task_id: &TaskId) -> broadcast::Receiver<StatusEvent> {
        self.prune_abandoned_topics();
        self.topics
            .entry(task_id.clone())
            .or_insert_with(|| broadcast::channel(self.per_task_capacity).0)
            .subscribe()
    }

    /// A receiver that is already closed, for tasks with nothing left to report
    pub fn closed_topic(&self) -> broadcast::Receiver<StatusEvent> {
        broadcast::channel(1).1
    }

    fn prune_abandoned_topics(&self) {
        self.topics.retain(|_, topic| topic.receiver_count() > 0);
    }

    pub fn publish(&self, task_id: &TaskId, status: TaskStatus, timestamp: DateTime<Utc>) {
        let event = StatusEvent {
            task_id: task_id.clone(),
            status,
            timestamp,
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        // No subscribers is not an error for a status feed
        let _ = self.global.send(event.clone());

        if status.is_terminal() {
            if let Some((_, topic)) = self.topics.remove(task_id) {
                let _ = topic.send(event.clone());
            }
        } else {
            let abandoned = match self.topics.get(task_id) {
                Some(topic) => topic.send(event.clone()).is_err(),
                None => false,
            };
            if abandoned {
                self.topics
                    .remove_if(task_id, |_, topic| topic.receiver_count() == 0);
            }
        }

        let sinks = self.sinks.read().clone();
        for sink in sinks {
            if let Err(e) = sink.deliver(&event) {
                self.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = sink.name(),
                    task_id = %task_id,
                    status = %status,
                    error = %e,
                    "Status sink failed, event dropped for this sink"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.global.receiver_count()
    }

    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            published: self.published.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            open_topics: self.topics.len(),
        }
    }
}
