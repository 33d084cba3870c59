use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use taskqueue_core::config::TaskQueueConfig;
use taskqueue_core::database::{DeadLetterStore, InMemoryDeadLetterStore, InMemoryTaskStore, TaskStore};
use taskqueue_core::models::{Priority, Task, TaskId};
use taskqueue_core::orchestration::{SubmitTaskRequest, TaskQueueSystem};
use taskqueue_core::registry::{HandlerRegistry, TaskHandler};
use taskqueue_core::state_machine::TaskStatus;

use super::wait_for;

/// Defaults shrunk to test timescales: millisecond backoff, short receive
/// waits, no metrics cache and no OpenTelemetry instruments
pub fn fast_config() -> TaskQueueConfig {
    let mut config = TaskQueueConfig::default();
    config.backoff.base_delay_ms = 5;
    config.backoff.max_delay_ms = 20;
    config.channels.receive_wait_ms = 10;
    config.channels.scale_interval_ms = 20;
    config.channels.visibility_timeout_ms = 2_000;
    config.channels.idle_polls_before_retire = 5;
    config.channels.high.min_consumers = 2;
    config.channels.high.max_consumers = 4;
    config.channels.medium.min_consumers = 1;
    config.channels.medium.max_consumers = 3;
    config.channels.low.min_consumers = 1;
    config.channels.low.max_consumers = 2;
    config.metrics.cache_ttl_ms = 0;
    config.metrics.otel_enabled = false;
    config
}

/// System wired to in-memory stores the test keeps handles to
pub struct TestSystem {
    pub system: TaskQueueSystem,
    pub store: Arc<InMemoryTaskStore>,
    pub dead_letters: Arc<InMemoryDeadLetterStore>,
}

impl TestSystem {
    pub fn build(config: TaskQueueConfig, handlers: Vec<(&str, Arc<dyn TaskHandler>)>) -> Self {
        Self::with_stores(
            config,
            handlers,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryDeadLetterStore::new()),
        )
    }

    pub fn with_stores(
        config: TaskQueueConfig,
        handlers: Vec<(&str, Arc<dyn TaskHandler>)>,
        store: Arc<InMemoryTaskStore>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
    ) -> Self {
        let mut registry = HandlerRegistry::new();
        for (task_type, handler) in handlers {
            registry.register(task_type, handler).expect("unique handler type");
        }
        let system = TaskQueueSystem::builder(config)
            .with_registry(registry)
            .with_stores(
                Arc::clone(&store) as Arc<dyn TaskStore>,
                Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
            )
            .build()
            .expect("valid test system");
        Self {
            system,
            store,
            dead_letters,
        }
    }

    pub async fn submit(&self, task_type: &str, priority: Priority, max_attempts: u32) -> TaskId {
        self.system
            .router()
            .submit(
                SubmitTaskRequest::new(task_type, priority, Some(json!({"test": true})))
                    .with_max_attempts(max_attempts),
            )
            .await
            .expect("submission accepted")
            .task_id
    }

    pub async fn task(&self, task_id: &TaskId) -> Task {
        self.store
            .load(task_id)
            .await
            .expect("store available")
            .expect("task exists")
    }

    /// Wait until the task reaches `status`, returning the final record
    pub async fn wait_for_status(&self, task_id: &TaskId, status: TaskStatus, timeout: Duration) -> Task {
        let this = self;
        let reached = wait_for(timeout, move || async move {
            this.task(task_id).await.status == status
        })
        .await;
        let task = self.task(task_id).await;
        assert!(
            reached,
            "task {} stuck in {} waiting for {}",
            task_id, task.status, status
        );
        task
    }

    pub async fn shutdown(&self) {
        self.system.shutdown(Duration::from_secs(2)).await;
    }
}
