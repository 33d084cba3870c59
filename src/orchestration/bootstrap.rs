//! # Task Queue Bootstrap
//!
//! Builds the system context once from configuration and collaborators, and
//! owns the lifecycle of the tier worker pools.
//!
//! ```text
//! builder -> build() -> recover() -> start() -> ... -> shutdown()
//! ```
//!
//! Stores and channels default to the in-memory backends; a PostgreSQL pair
//! is available through [`connect_postgres_stores`].

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::context::SystemContext;
use super::submission::SubmissionRouter;
use super::task_processor::TaskProcessor;
use super::worker_pool::{PoolStats, TierWorkerPool};
use crate::config::{DatabaseConfig, StorageBackend, TaskQueueConfig};
use crate::database::{
    DatabaseConnection, DeadLetterStore, InMemoryDeadLetterStore, InMemoryTaskStore,
    PgDeadLetterStore, PgTaskStore, StoreError, TaskStore,
};
use crate::error::Result;
use crate::events::{StatusBroadcaster, StatusSink};
use crate::messaging::{PriorityChannelSet, TaskMessage};
use crate::models::Priority;
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::state_machine::TaskStatus;

/// Connect the PostgreSQL task and dead-letter stores sharing one pool
pub async fn connect_postgres_stores(
    config: &DatabaseConfig,
) -> Result<(Arc<dyn TaskStore>, Arc<dyn DeadLetterStore>)> {
    let connection = DatabaseConnection::connect(config)
        .await
        .map_err(StoreError::from)?;
    let pool = connection.pool().clone();
    Ok((
        Arc::new(PgTaskStore::new(pool.clone())),
        Arc::new(PgDeadLetterStore::new(pool)),
    ))
}

pub struct TaskQueueSystemBuilder {
    config: TaskQueueConfig,
    registry: HandlerRegistry,
    stores: Option<(Arc<dyn TaskStore>, Arc<dyn DeadLetterStore>)>,
    channels: Option<PriorityChannelSet>,
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl TaskQueueSystemBuilder {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            stores: None,
            channels: None,
            sinks: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one handler; duplicate types fail here, before anything runs
    pub fn with_handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    pub fn with_stores(mut self, store: Arc<dyn TaskStore>, dead_letters: Arc<dyn DeadLetterStore>) -> Self {
        self.stores = Some((store, dead_letters));
        self
    }

    pub fn with_channels(mut self, channels: PriorityChannelSet) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate configuration and assemble the system. Nothing is started.
    pub fn build(self) -> Result<TaskQueueSystem> {
        self.config.validate()?;

        if self.stores.is_none() && self.config.storage.backend == StorageBackend::Postgres {
            warn!("⚙️ CONFIG: postgres backend configured but no stores supplied, using in-memory stores");
        }
        let (store, dead_letters) = self.stores.unwrap_or_else(|| {
            (
                Arc::new(InMemoryTaskStore::new()) as Arc<dyn TaskStore>,
                Arc::new(InMemoryDeadLetterStore::new()) as Arc<dyn DeadLetterStore>,
            )
        });
        let channels = self
            .channels
            .unwrap_or_else(|| PriorityChannelSet::in_memory(self.config.channels.settings()));

        let broadcaster = Arc::new(StatusBroadcaster::new(
            self.config.events.global_capacity,
            self.config.events.per_task_capacity,
        ));
        for sink in self.sinks {
            broadcaster.add_sink(sink);
        }

        if self.registry.is_empty() {
            warn!("No task handlers registered; every submission will be rejected");
        }

        let context = SystemContext::new(
            Arc::new(self.config),
            store,
            dead_letters,
            channels,
            Arc::new(self.registry),
            broadcaster,
        );
        info!(
            instance_id = %context.instance_id,
            handlers = ?context.registry.list_types(),
            "✅ SYSTEM: Task queue assembled"
        );
        Ok(TaskQueueSystem::new(context))
    }
}

/// What startup recovery re-published
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Due `PENDING` tasks published immediately
    pub republished: usize,
    /// Not-yet-due `PENDING` tasks handed to the delayed publisher
    pub scheduled: usize,
    /// `PROCESSING` tasks re-published so their lease gets resolved
    pub processing: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.republished + self.scheduled + self.processing
    }
}

pub struct TaskQueueSystem {
    context: SystemContext,
    router: SubmissionRouter,
    pools: Mutex<Vec<Arc<TierWorkerPool>>>,
}

impl std::fmt::Debug for TaskQueueSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueueSystem")
            .field("context", &self.context)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TaskQueueSystem {
    pub fn builder(config: TaskQueueConfig) -> TaskQueueSystemBuilder {
        TaskQueueSystemBuilder::new(config)
    }

    fn new(context: SystemContext) -> Self {
        Self {
            router: SubmissionRouter::new(context.clone()),
            context,
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn router(&self) -> &SubmissionRouter {
        &self.router
    }

    pub fn context(&self) -> &SystemContext {
        &self.context
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.context.broadcaster
    }

    pub fn is_running(&self) -> bool {
        !self.pools.lock().is_empty()
    }

    /// Start one worker pool per tier. Calling it again is a no-op.
    pub fn start(&self) {
        let mut pools = self.pools.lock();
        if !pools.is_empty() {
            warn!("Task queue already started");
            return;
        }
        for priority in Priority::ALL {
            let pool = Arc::new(TierWorkerPool::new(
                priority,
                TaskProcessor::new(self.context.clone()),
            ));
            pool.start();
            pools.push(pool);
        }
        info!("🚀 SYSTEM: Worker pools started for all tiers");
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.lock().iter().map(|pool| pool.stats()).collect()
    }

    /// Re-publish non-terminal tasks left over from a previous run, highest
    /// tier and oldest first. A `PROCESSING` record is re-published too; the
    /// worker holds it until the lease times out and then resolves it through
    /// the retry policy.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let batch = self.context.config.execution.recovery_batch_size;
        let tasks = self.context.store.find_recoverable(batch).await?;
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for task in tasks {
            let message = TaskMessage::for_task(&task);
            match task.status {
                TaskStatus::Pending => match task.delay_until_due(now) {
                    Some(delay) => {
                        self.context.scheduler.schedule(message, delay);
                        report.scheduled += 1;
                    }
                    None => {
                        self.context.channels.publish(message).await?;
                        report.republished += 1;
                    }
                },
                TaskStatus::Processing => {
                    self.context.channels.publish(message).await?;
                    report.processing += 1;
                }
                _ => {}
            }
        }

        info!(
            republished = report.republished,
            scheduled = report.scheduled,
            processing = report.processing,
            "🔄 RECOVERY: Re-published unfinished tasks"
        );
        Ok(report)
    }

    /// Stop receiving new deliveries, let in-flight ones finish, cancel
    /// pending delayed publishes and close the channels.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("🛑 SYSTEM: Shutting down task queue");
        self.context.scheduler.shutdown();

        let pools: Vec<Arc<TierWorkerPool>> = std::mem::take(&mut *self.pools.lock());
        futures::future::join_all(pools.iter().map(|pool| pool.shutdown(timeout))).await;

        self.context.channels.close_all();
        info!("✅ SYSTEM: Task queue stopped");
    }
}
