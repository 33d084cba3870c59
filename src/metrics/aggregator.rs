//! # Metrics Aggregator
//!
//! Write path: lock-free atomic increments from any number of workers, plus a
//! `(count, sum)` pair for the processing-time mean packed into one 64-bit word
//! so it is updated with a single native compare-and-swap.
//! Read path: a snapshot served from a short-lived cache, recomputed from the
//! task store on a miss. Readers never touch anything writers wait on.

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::otel::QueueInstruments;
use crate::database::{StoreResult, TaskStore};
use crate::messaging::PriorityChannelSet;
use crate::models::Priority;
use crate::state_machine::TaskStatus;

const COUNT_BITS: u32 = 24;
const SUM_BITS: u32 = 64 - COUNT_BITS;
const COUNT_MAX: u64 = (1 << COUNT_BITS) - 1;
const SUM_MAX: u64 = (1 << SUM_BITS) - 1;

/// Running totals behind the streaming mean, updated as one value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingTimeTotals {
    pub count: u64,
    pub sum_ms: u64,
}

impl ProcessingTimeTotals {
    pub fn mean_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_ms as f64 / self.count as f64)
    }

    /// Fold one sample in. When either field would overflow its packed width
    /// both are halved first, which keeps the mean and ages out old samples.
    fn with_sample(self, ms: u64) -> Self {
        let ms = ms.min(SUM_MAX / 2);
        let mut totals = self;
        while totals.count + 1 > COUNT_MAX || totals.sum_ms + ms > SUM_MAX {
            totals.count /= 2;
            totals.sum_ms /= 2;
        }
        Self {
            count: totals.count + 1,
            sum_ms: totals.sum_ms + ms,
        }
    }

    fn pack(self) -> u64 {
        (self.count << SUM_BITS) | self.sum_ms
    }

    fn unpack(word: u64) -> Self {
        Self {
            count: word >> SUM_BITS,
            sum_ms: word & SUM_MAX,
        }
    }
}

/// Read-only view of queue health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub processing_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// Accepted by this process since start
    pub submitted_tasks: u64,
    pub retried_attempts: u64,
    pub success_rate: f64,
    pub average_processing_time_ms: f64,
    pub submitted_by_priority: BTreeMap<Priority, u64>,
    pub failed_by_task_type: BTreeMap<String, u64>,
    pub channel_depths: BTreeMap<Priority, u64>,
    pub computed_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn total_channel_depth(&self) -> u64 {
        self.channel_depths.values().sum()
    }
}

/// `completed / total * 100`, clamped to `[0, 100]`, two decimals, 0 when empty
pub fn success_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    (rate * 100.0).round() / 100.0
}

struct CachedSnapshot {
    snapshot: MetricsSnapshot,
    computed_at: Instant,
}

pub struct MetricsAggregator {
    store: Arc<dyn TaskStore>,
    channels: PriorityChannelSet,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedSnapshot>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
    submitted_by_priority: [AtomicU64; 3],
    failed_by_task_type: DashMap<String, AtomicU64>,
    processing: AtomicCell<u64>,
    instruments: Option<QueueInstruments>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .field("processing", &self.processing_totals())
            .finish()
    }
}

impl MetricsAggregator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channels: PriorityChannelSet,
        cache_ttl: Duration,
        otel_enabled: bool,
    ) -> Self {
        Self {
            store,
            channels,
            cache_ttl,
            cache: RwLock::new(None),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            submitted_by_priority: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            failed_by_task_type: DashMap::new(),
            processing: AtomicCell::new(0),
            instruments: otel_enabled.then(QueueInstruments::new),
        }
    }

    pub fn record_submitted(&self, priority: Priority) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.submitted_by_priority[priority.index()].fetch_add(1, Ordering::Relaxed);
        if let Some(instruments) = &self.instruments {
            instruments.submitted(priority);
        }
    }

    /// Count a completion and fold its duration into the mean as one update
    pub fn record_completed(&self, priority: Priority, duration: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let _ = self.processing.fetch_update(|word| {
            Some(ProcessingTimeTotals::unpack(word).with_sample(ms).pack())
        });
        if let Some(instruments) = &self.instruments {
            instruments.completed(priority, ms as f64);
        }
    }

    pub fn record_retried(&self, task_type: &str) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        if let Some(instruments) = &self.instruments {
            instruments.retried(task_type);
        }
    }

    pub fn record_failed(&self, task_type: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.failed_by_task_type.get(task_type) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_by_task_type
                .entry(task_type.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Some(instruments) = &self.instruments {
            instruments.failed(task_type);
        }
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        if let Some(instruments) = &self.instruments {
            instruments.cancelled();
        }
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried_count(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn processing_totals(&self) -> ProcessingTimeTotals {
        ProcessingTimeTotals::unpack(self.processing.load())
    }

    /// Streaming mean if any completion was observed in-process
    pub fn mean_processing_ms(&self) -> Option<f64> {
        self.processing_totals().mean_ms()
    }

    /// Drop the cached snapshot so the next read recomputes
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    /// Cached snapshot if fresh, otherwise recomputed from the task store.
    /// A store failure falls back to the last cached snapshot when one exists.
    pub async fn snapshot(&self) -> StoreResult<MetricsSnapshot> {
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.computed_at.elapsed() < self.cache_ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        match self.recompute().await {
            Ok(snapshot) => {
                *self.cache.write() = Some(CachedSnapshot {
                    snapshot: snapshot.clone(),
                    computed_at: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => {
                if let Some(cached) = self.cache.read().as_ref() {
                    warn!(error = %e, "Metrics recomputation failed, serving stale snapshot");
                    return Ok(cached.snapshot.clone());
                }
                Err(e)
            }
        }
    }

    async fn recompute(&self) -> StoreResult<MetricsSnapshot> {
        let counts = self.store.count_by_status_all().await?;
        let count = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);
        let total_tasks = self.store.count_all().await?;
        let completed_tasks = count(TaskStatus::Completed);

        let average_processing_time_ms = match self.mean_processing_ms() {
            Some(mean) => mean,
            None => self.store.average_processing_ms().await?.unwrap_or(0.0),
        };

        let mut channel_depths = BTreeMap::new();
        for priority in Priority::ALL {
            // Depth is informational; an unreachable channel reads as empty
            let depth = self.channels.depth(priority).await.unwrap_or(0);
            if let Some(instruments) = &self.instruments {
                instruments.channel_depth(priority, depth);
            }
            channel_depths.insert(priority, depth);
        }

        let submitted_by_priority = Priority::ALL
            .into_iter()
            .map(|p| (p, self.submitted_by_priority[p.index()].load(Ordering::Relaxed)))
            .collect();
        let failed_by_task_type = self
            .failed_by_task_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        let snapshot = MetricsSnapshot {
            total_tasks,
            pending_tasks: count(TaskStatus::Pending),
            processing_tasks: count(TaskStatus::Processing),
            completed_tasks,
            failed_tasks: count(TaskStatus::Failed),
            cancelled_tasks: count(TaskStatus::Cancelled),
            submitted_tasks: self.submitted_count(),
            retried_attempts: self.retried_count(),
            success_rate: success_rate(completed_tasks, total_tasks),
            average_processing_time_ms: (average_processing_time_ms * 100.0).round() / 100.0,
            submitted_by_priority,
            failed_by_task_type,
            channel_depths,
            computed_at: Utc::now(),
        };
        debug!(
            total = snapshot.total_tasks,
            pending = snapshot.pending_tasks,
            processing = snapshot.processing_tasks,
            "Recomputed metrics snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryTaskStore;
    use crate::messaging::{ChannelSettings, TaskMessage};
    use crate::models::Task;
    use serde_json::json;

    fn aggregator(store: Arc<InMemoryTaskStore>, ttl: Duration) -> (MetricsAggregator, PriorityChannelSet) {
        let channels = PriorityChannelSet::in_memory(ChannelSettings::default());
        (
            MetricsAggregator::new(store, channels.clone(), ttl, false),
            channels,
        )
    }

    #[test]
    fn test_success_rate_bounds() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(5, 5), 100.0);
        assert_eq!(success_rate(1, 3), 33.33);
        assert_eq!(success_rate(7, 3), 100.0);
    }

    #[test]
    fn test_streaming_mean_is_single_update() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (metrics, _) = aggregator(store, Duration::from_secs(5));
        assert_eq!(metrics.mean_processing_ms(), None);

        metrics.record_completed(Priority::High, Duration::from_millis(100));
        metrics.record_completed(Priority::High, Duration::from_millis(300));

        let totals = metrics.processing_totals();
        assert_eq!(totals, ProcessingTimeTotals { count: 2, sum_ms: 400 });
        assert_eq!(metrics.mean_processing_ms(), Some(200.0));
        assert_eq!(metrics.completed_count(), 2);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (metrics, _) = aggregator(store, Duration::from_secs(5));
        let metrics = Arc::new(metrics);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_completed(Priority::Low, Duration::from_millis(2));
                        metrics.record_failed("email-send");
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(metrics.processing_totals(), ProcessingTimeTotals { count: 8_000, sum_ms: 16_000 });
        assert_eq!(metrics.failed_count(), 8_000);
    }

    #[cfg(target_has_atomic = "64")]
    #[test]
    fn test_processing_totals_use_a_native_atomic() {
        assert!(AtomicCell::<u64>::is_lock_free());
    }

    #[test]
    fn test_packed_totals_halve_instead_of_overflowing() {
        let full = ProcessingTimeTotals {
            count: COUNT_MAX,
            sum_ms: COUNT_MAX * 10,
        };
        assert_eq!(ProcessingTimeTotals::unpack(full.pack()), full);

        let next = full.with_sample(10);
        assert_eq!(next.count, COUNT_MAX / 2 + 1);
        assert!((next.mean_ms().unwrap() - 10.0).abs() < 1e-3);

        let heavy = ProcessingTimeTotals { count: 4, sum_ms: SUM_MAX - 1 };
        let next = heavy.with_sample(1_000);
        assert!(next.sum_ms <= SUM_MAX);
        assert_eq!(next.count, 3);
    }

    #[tokio::test]
    async fn test_snapshot_reads_store_and_channels() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (metrics, channels) = aggregator(Arc::clone(&store), Duration::from_secs(60));

        let pending = Task::new("email-send", Priority::High, json!({}), 3, None);
        let mut done = Task::new("email-send", Priority::Low, json!({}), 3, None);
        done.status = TaskStatus::Completed;
        store.insert(&pending).await.unwrap();
        store.insert(&done).await.unwrap();
        channels.publish(TaskMessage::for_task(&pending)).await.unwrap();
        metrics.record_submitted(Priority::High);
        metrics.record_failed("image-process");

        let snapshot = metrics.snapshot().await.unwrap();
        assert_eq!(snapshot.total_tasks, 2);
        assert_eq!(snapshot.pending_tasks, 1);
        assert_eq!(snapshot.completed_tasks, 1);
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.channel_depths[&Priority::High], 1);
        assert_eq!(snapshot.submitted_by_priority[&Priority::High], 1);
        assert_eq!(snapshot.failed_by_task_type["image-process"], 1);
    }

    #[tokio::test]
    async fn test_snapshot_cache_and_invalidation() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (metrics, _) = aggregator(Arc::clone(&store), Duration::from_secs(60));

        assert_eq!(metrics.snapshot().await.unwrap().total_tasks, 0);
        store
            .insert(&Task::new("email-send", Priority::High, json!({}), 3, None))
            .await
            .unwrap();

        // Still cached
        assert_eq!(metrics.snapshot().await.unwrap().total_tasks, 0);
        metrics.invalidate();
        assert_eq!(metrics.snapshot().await.unwrap().total_tasks, 1);
    }

    #[tokio::test]
    async fn test_store_outage_serves_stale_snapshot() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (metrics, _) = aggregator(Arc::clone(&store), Duration::ZERO);

        assert!(metrics.snapshot().await.is_ok());
        store.set_available(false);
        assert!(metrics.snapshot().await.is_ok());

        metrics.invalidate();
        assert!(metrics.snapshot().await.is_err());
    }
}
