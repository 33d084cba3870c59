//! # Tier Worker Pools
//!
//! Each priority tier owns an independent, bounded set of execution units
//! consuming from that tier's channel. A pool starts `min_consumers` units;
//! a scaler loop adds units up to `max_consumers` while the tier has a
//! backlog that the idle units cannot absorb, and surplus units retire after
//! a run of empty polls, never dropping below the minimum.
//!
//! A unit resolves one delivery fully before receiving the next. Retry
//! backoff is handed to the delayed publisher, so a unit is never parked on
//! a delay.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::delayed_publisher::stopped;
use super::task_processor::TaskProcessor;
use crate::constants::system;
use crate::messaging::{ChannelError, Delivery, MessageChannel};
use crate::models::Priority;

/// Point-in-time view of one tier pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub priority: Priority,
    pub active_units: usize,
    pub busy_units: usize,
    pub min_units: usize,
    pub max_units: usize,
    pub processed: u64,
}

pub struct TierWorkerPool {
    priority: Priority,
    processor: TaskProcessor,
    channel: Arc<dyn MessageChannel>,
    min_units: usize,
    max_units: usize,
    receive_wait: Duration,
    scale_interval: Duration,
    idle_polls_before_retire: u32,
    active: AtomicUsize,
    busy: AtomicUsize,
    processed: AtomicU64,
    next_unit: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
    units: Mutex<Vec<JoinHandle<()>>>,
    scaler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TierWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierWorkerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl TierWorkerPool {
    pub fn new(priority: Priority, processor: TaskProcessor) -> Self {
        let (channel, tier, receive_wait, scale_interval, idle_polls_before_retire) = {
            let context = processor.context();
            let channels = &context.config.channels;
            (
                Arc::clone(context.channels.channel(priority)),
                *channels.tier(priority),
                channels.receive_wait(),
                channels.scale_interval(),
                channels.idle_polls_before_retire,
            )
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            priority,
            processor,
            channel,
            min_units: tier.min_consumers,
            max_units: tier.max_consumers.max(tier.min_consumers),
            receive_wait,
            scale_interval,
            idle_polls_before_retire,
            active: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            next_unit: AtomicUsize::new(0),
            shutdown_tx,
            units: Mutex::new(Vec::new()),
            scaler: Mutex::new(None),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Spawn the minimum set of units and the scaler loop
    pub fn start(self: &Arc<Self>) {
        info!(
            "🏊 POOL: Starting {} pool (min: {}, max: {})",
            self.priority, self.min_units, self.max_units
        );
        for _ in 0..self.min_units {
            self.spawn_unit();
        }

        let pool = Arc::clone(self);
        *self.scaler.lock() = Some(tokio::spawn(async move { pool.run_scaler().await }));
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            priority: self.priority,
            active_units: self.active.load(Ordering::SeqCst),
            busy_units: self.busy.load(Ordering::SeqCst),
            min_units: self.min_units,
            max_units: self.max_units,
            processed: self.processed.load(Ordering::Relaxed),
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Reserve a slot below the maximum and spawn a unit into it
    fn spawn_unit(self: &Arc<Self>) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < self.max_units).then_some(active + 1)
            })
            .is_ok();
        if !reserved {
            return false;
        }

        let unit = self.next_unit.fetch_add(1, Ordering::Relaxed);
        let worker_id = format!(
            "{}{}-{}-{}",
            system::WORKER_ID_PREFIX,
            self.processor.context().instance_id,
            self.priority.label(),
            unit
        );
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move { pool.run_unit(worker_id).await });

        let mut units = self.units.lock();
        units.retain(|handle| !handle.is_finished());
        units.push(handle);
        true
    }

    /// Give up a slot if the pool is above its minimum
    fn try_retire(&self) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active > self.min_units).then(|| active - 1)
            })
            .is_ok()
    }

    async fn run_unit(self: Arc<Self>, worker_id: String) {
        debug!(worker_id = %worker_id, priority = %self.priority, "Execution unit started");
        let mut idle_polls = 0u32;
        let mut retired = false;

        while !self.is_shutting_down() {
            match self.channel.receive(self.receive_wait).await {
                Ok(Some(delivery)) => {
                    idle_polls = 0;
                    self.handle_delivery(delivery, &worker_id).await;
                }
                Ok(None) => {
                    idle_polls = idle_polls.saturating_add(1);
                    if idle_polls >= self.idle_polls_before_retire && self.try_retire() {
                        retired = true;
                        break;
                    }
                }
                Err(ChannelError::Closed { .. }) => break,
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Channel receive failed, backing off");
                    tokio::time::sleep(self.receive_wait).await;
                }
            }
        }

        if retired {
            info!(
                "🎛️ SCALING: Retired idle {} unit {} ({} active)",
                self.priority,
                worker_id,
                self.active.load(Ordering::SeqCst)
            );
        } else {
            self.active.fetch_sub(1, Ordering::SeqCst);
            debug!(worker_id = %worker_id, "Execution unit stopped");
        }
    }

    async fn handle_delivery(&self, delivery: Delivery, worker_id: &str) {
        self.busy.fetch_add(1, Ordering::SeqCst);
        let result = self.processor.process(&delivery, worker_id).await;
        self.busy.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(outcome) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id,
                    task_id = %delivery.message.task_id,
                    outcome = ?outcome,
                    "Delivery resolved"
                );
                if outcome.should_ack() {
                    if let Err(e) = self.channel.ack(delivery.message_id).await {
                        warn!(
                            task_id = %delivery.message.task_id,
                            error = %e,
                            "Failed to acknowledge delivery, it will be redelivered"
                        );
                    }
                }
            }
            Err(e) => {
                error!(
                    worker_id,
                    task_id = %delivery.message.task_id,
                    error = %e,
                    "Delivery processing failed, leaving message for redelivery"
                );
            }
        }
    }

    async fn run_scaler(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.scale_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => self.scale_once().await,
            }
        }
    }

    /// Add units for the backlog idle units cannot take on
    async fn scale_once(self: &Arc<Self>) {
        let depth = match self.channel.depth().await {
            Ok(depth) => usize::try_from(depth).unwrap_or(usize::MAX),
            Err(e) => {
                debug!(priority = %self.priority, error = %e, "Depth unavailable, skipping scale check");
                return;
            }
        };
        let active = self.active.load(Ordering::SeqCst);
        let idle = active.saturating_sub(self.busy.load(Ordering::SeqCst));
        if depth <= idle || active >= self.max_units {
            return;
        }

        let wanted = (depth - idle).min(self.max_units - active);
        let spawned = (0..wanted).filter(|_| self.spawn_unit()).count();
        if spawned > 0 {
            info!(
                "🎛️ SCALING: {} backlog {} -> added {} units ({} active, max {})",
                self.priority,
                depth,
                spawned,
                self.active.load(Ordering::SeqCst),
                self.max_units
            );
        }
    }

    /// Stop receiving, let in-flight deliveries finish, and join every unit.
    /// Units still running after `timeout` are aborted.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown_tx.send_replace(true);

        let scaler = self.scaler.lock().take();
        if let Some(scaler) = scaler {
            let _ = scaler.await;
        }

        let units: Vec<JoinHandle<()>> = std::mem::take(&mut *self.units.lock());
        let aborts: Vec<_> = units.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(units))
            .await
            .is_err()
        {
            warn!(
                "🛑 POOL: {} pool did not drain within {:?}, aborting remaining units",
                self.priority, timeout
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!("🛑 POOL: {} pool stopped", self.priority);
    }
}
