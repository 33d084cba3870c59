//! # Task Processor
//!
//! Resolves one delivery to completion: reload the record, decide whether
//! the delivery is still meaningful, take the processing lease, run the
//! handler, and record the outcome.
//!
//! Every write is a compare-and-swap on the record version. A duplicate
//! delivery that races the original loses the swap and is dropped without
//! touching metrics or the broadcaster, which is what makes terminal status
//! recording exactly-once under at-least-once delivery.
//!
//! Terminal failures append the dead-letter record *before* the FAILED swap.
//! The append is idempotent per task id, so if the swap is lost to a crash
//! the redelivery converges on the same single record.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::context::SystemContext;
use super::retry_policy::RetryDecision;
use crate::error::{Result, TaskQueueError};
use crate::logging::log_task_operation;
use crate::messaging::{Delivery, TaskMessage};
use crate::models::{DeadLetterRecord, Task};
use crate::registry::HandlerError;
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};

/// What a worker did with one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { duration: Duration },
    RetryScheduled { attempt: u32, delay: Duration },
    DeadLettered { attempt: u32 },
    /// Task already terminal; nothing executed or recorded
    SkippedTerminal { status: TaskStatus },
    /// Delivery belongs to an earlier attempt than the record's current one
    SkippedStale,
    /// Another writer changed the record first
    SkippedLostRace,
    /// `not_before` not reached yet; a delayed publish was scheduled
    Deferred { delay: Duration },
    /// Another worker holds a fresh lease on the task
    LeaseHeld,
    /// No record for the delivered id
    Missing,
}

impl ProcessOutcome {
    /// Whether the delivery should be removed from its channel. A held lease
    /// keeps the message in flight so it is redelivered if the holder dies.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::LeaseHeld)
    }
}

#[derive(Debug, Clone)]
pub struct TaskProcessor {
    context: SystemContext,
}

impl TaskProcessor {
    pub fn new(context: SystemContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SystemContext {
        &self.context
    }

    /// Process one delivery. An `Err` means an infrastructure fault; the
    /// caller leaves the delivery unacknowledged so it is redelivered.
    pub async fn process(&self, delivery: &Delivery, worker_id: &str) -> Result<ProcessOutcome> {
        let task_id = &delivery.message.task_id;
        let Some(mut task) = self.context.store.load(task_id).await? else {
            warn!(task_id = %task_id, "Delivered task has no record, dropping message");
            return Ok(ProcessOutcome::Missing);
        };

        if task.status.is_terminal() {
            debug!(
                task_id = %task_id,
                status = %task.status,
                redelivery = delivery.is_redelivery(),
                "Task already terminal, skipping delivery"
            );
            return Ok(ProcessOutcome::SkippedTerminal {
                status: task.status,
            });
        }

        let now = Utc::now();
        if task.status == TaskStatus::Processing {
            if !task.lease_expired(now, self.context.config.execution.lease_timeout()) {
                debug!(task_id = %task_id, holder = ?task.worker_id, "Task lease still held");
                return Ok(ProcessOutcome::LeaseHeld);
            }
            warn!(
                task_id = %task_id,
                holder = ?task.worker_id,
                "Processing lease expired, resolving through retry policy"
            );
            return self.resolve_failure(task, "worker lease expired".to_string()).await;
        }

        if delivery.message.attempt <= task.attempt_count {
            debug!(
                task_id = %task_id,
                message_attempt = delivery.message.attempt,
                attempt_count = task.attempt_count,
                "Delivery is for an earlier attempt, skipping"
            );
            return Ok(ProcessOutcome::SkippedStale);
        }

        if let Some(delay) = task.delay_until_due(now) {
            debug!(task_id = %task_id, delay_ms = delay.as_millis() as u64, "Task not yet due, deferring");
            self.context
                .scheduler
                .schedule(TaskMessage::for_task(&task), delay);
            return Ok(ProcessOutcome::Deferred { delay });
        }

        self.transition(&mut task, TaskEvent::start(worker_id))?;
        if !self.persist(&mut task).await? {
            debug!(task_id = %task_id, worker_id, "Lost race taking task lease");
            return Ok(ProcessOutcome::SkippedLostRace);
        }
        self.announce(&task, "start", None);

        let started = Instant::now();
        let result = self.run_handler(&task).await;
        let duration = started.elapsed();

        match result {
            Ok(()) => self.complete(task, duration).await,
            Err(e) => {
                info!(
                    task_id = %task.task_id,
                    task_type = %task.task_type,
                    attempt = task.attempt_count + 1,
                    error = %e,
                    "Task handler failed"
                );
                self.resolve_failure(task, e.to_string()).await
            }
        }
    }

    async fn run_handler(&self, task: &Task) -> std::result::Result<(), HandlerError> {
        let timeout = self.context.config.execution.handler_timeout();
        let execution = AssertUnwindSafe(
            self.context
                .registry
                .execute(&task.task_type, &task.payload),
        )
        .catch_unwind();

        match tokio::time::timeout(timeout, execution).await {
            Err(_) => Err(HandlerError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(panic)) => Err(HandlerError::Panicked {
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(result)) => result,
        }
    }

    async fn complete(&self, mut task: Task, duration: Duration) -> Result<ProcessOutcome> {
        self.transition(&mut task, TaskEvent::Complete)?;
        if !self.persist(&mut task).await? {
            return Ok(ProcessOutcome::SkippedLostRace);
        }
        self.context.metrics.record_completed(task.priority, duration);
        self.announce(&task, "complete", None);
        Ok(ProcessOutcome::Completed { duration })
    }

    /// Apply the retry policy's decision for a failed attempt
    async fn resolve_failure(&self, mut task: Task, error: String) -> Result<ProcessOutcome> {
        let decision = self
            .context
            .retry_policy
            .decide(task.attempt_count, task.max_attempts, error);

        match decision {
            RetryDecision::Retry {
                attempt,
                delay,
                error,
            } => {
                self.transition(&mut task, TaskEvent::retry_with_error(error.as_str()))?;
                if !self.persist(&mut task).await? {
                    return Ok(ProcessOutcome::SkippedLostRace);
                }
                self.context.metrics.record_retried(&task.task_type);
                self.announce(&task, "retry", Some(&error));
                self.context
                    .scheduler
                    .schedule(TaskMessage::for_task(&task), delay);
                Ok(ProcessOutcome::RetryScheduled { attempt, delay })
            }
            RetryDecision::Terminal { attempt, error } => {
                let record = DeadLetterRecord::from_task(&task, error.as_str(), attempt);
                if !self.context.dead_letters.append(&record).await? {
                    debug!(task_id = %task.task_id, "Dead-letter record already present");
                }

                self.transition(&mut task, TaskEvent::fail_with_error(error.as_str()))?;
                if !self.persist(&mut task).await? {
                    return Ok(ProcessOutcome::SkippedLostRace);
                }
                self.context.metrics.record_failed(&task.task_type);
                self.announce(&task, "fail", Some(&error));
                Ok(ProcessOutcome::DeadLettered { attempt })
            }
        }
    }

    fn transition(&self, task: &mut Task, event: TaskEvent) -> Result<()> {
        TaskStateMachine::apply(task, &event, Utc::now())
            .map(|_| ())
            .map_err(|e| TaskQueueError::from_state_machine(&task.task_id, task.status, e))
    }

    /// Conditional write; on success the local copy tracks the stored version
    async fn persist(&self, task: &mut Task) -> Result<bool> {
        let written = self.context.store.update(task).await?;
        if written {
            task.version += 1;
        }
        Ok(written)
    }

    fn announce(&self, task: &Task, operation: &str, details: Option<&str>) {
        let timestamp = match task.status {
            TaskStatus::Processing => task.started_at,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => task.completed_at,
            TaskStatus::Pending => None,
        }
        .unwrap_or_else(Utc::now);
        self.context
            .broadcaster
            .publish(&task.task_id, task.status, timestamp);
        log_task_operation(
            operation,
            &task.task_id,
            &task.task_type,
            task.priority,
            task.status,
            details,
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskQueueConfig;
    use crate::database::{DeadLetterStore, InMemoryDeadLetterStore, InMemoryTaskStore, TaskStore};
    use crate::events::StatusBroadcaster;
    use crate::messaging::{ChannelSettings, MessageChannel, PriorityChannelSet};
    use crate::models::Priority;
    use crate::registry::{HandlerRegistry, TaskHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn execute(&self, _payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandlerError::failed(format!("failure {}", call + 1)))
            } else {
                Ok(())
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskHandler for Panics {
        async fn execute(&self, _payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    struct Harness {
        processor: TaskProcessor,
        store: Arc<InMemoryTaskStore>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        channels: PriorityChannelSet,
        flaky: Arc<Flaky>,
    }

    fn harness(failures: u32) -> Harness {
        let mut config = TaskQueueConfig::default();
        config.backoff.base_delay_ms = 1;
        config.backoff.max_delay_ms = 5;
        config.metrics.otel_enabled = false;

        let flaky = Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        });
        let mut registry = HandlerRegistry::new();
        registry.register("flaky", Arc::clone(&flaky) as Arc<dyn TaskHandler>).unwrap();
        registry.register("panics", Arc::new(Panics)).unwrap();

        let store = Arc::new(InMemoryTaskStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let channels = PriorityChannelSet::in_memory(ChannelSettings::default());
        let context = SystemContext::new(
            Arc::new(config),
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
            channels.clone(),
            Arc::new(registry),
            Arc::new(StatusBroadcaster::default()),
        );

        Harness {
            processor: TaskProcessor::new(context),
            store,
            dead_letters,
            channels,
            flaky,
        }
    }

    async fn enqueue(harness: &Harness, task_type: &str, max_attempts: u32) -> Task {
        let task = Task::new(task_type, Priority::High, json!({}), max_attempts, None);
        harness.store.insert(&task).await.unwrap();
        harness.channels.publish(TaskMessage::for_task(&task)).await.unwrap();
        task
    }

    async fn next(harness: &Harness) -> Delivery {
        harness
            .channels
            .channel(Priority::High)
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("a delivery")
    }

    #[tokio::test]
    async fn test_success_completes_task() {
        let h = harness(0);
        let task = enqueue(&h, "flaky", 3).await;

        let outcome = h.processor.process(&next(&h).await, "worker_t").await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed { .. }));

        let stored = h.store.load(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(h.processor.context().metrics.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_schedules_retry_without_blocking() {
        let h = harness(1);
        let task = enqueue(&h, "flaky", 3).await;

        let outcome = h.processor.process(&next(&h).await, "worker_t").await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::RetryScheduled {
                attempt: 1,
                delay: Duration::from_millis(2)
            }
        );
        let stored = h.store.load(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("failure 1"));

        // Re-published by the timer, then succeeds
        let retry = next(&h).await;
        assert_eq!(retry.message.attempt, 2);
        let outcome = h.processor.process(&retry, "worker_t").await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed { .. }));
        assert_eq!(h.flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters_once() {
        let h = harness(u32::MAX);
        let task = enqueue(&h, "flaky", 1).await;

        let delivery = next(&h).await;
        let outcome = h.processor.process(&delivery, "worker_t").await.unwrap();
        assert_eq!(outcome, ProcessOutcome::DeadLettered { attempt: 1 });

        let stored = h.store.load(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempt_count, 1);

        // Redelivery of the same message is a no-op
        let again = h.processor.process(&delivery, "worker_u").await.unwrap();
        assert_eq!(
            again,
            ProcessOutcome::SkippedTerminal {
                status: TaskStatus::Failed
            }
        );
        assert_eq!(h.dead_letters.records().len(), 1);
        assert_eq!(h.processor.context().metrics.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained_as_failure() {
        let h = harness(0);
        let task = enqueue(&h, "panics", 1).await;

        let outcome = h.processor.process(&next(&h).await, "worker_t").await.unwrap();
        assert_eq!(outcome, ProcessOutcome::DeadLettered { attempt: 1 });
        let record = h.dead_letters.find_by_task_id(&task.task_id).await.unwrap().unwrap();
        assert!(record.failure_reason.contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_fresh_lease_is_not_acked() {
        let h = harness(0);
        let mut task = enqueue(&h, "flaky", 3).await;
        TaskStateMachine::apply(&mut task, &TaskEvent::start("worker_other"), Utc::now()).unwrap();
        assert!(h.store.update(&task).await.unwrap());

        let outcome = h.processor.process(&next(&h).await, "worker_t").await.unwrap();
        assert_eq!(outcome, ProcessOutcome::LeaseHeld);
        assert!(!outcome.should_ack());
        assert_eq!(h.flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let h = harness(0);
        enqueue(&h, "flaky", 3).await;
        h.store.set_available(false);

        let result = h.processor.process(&next(&h).await, "worker_t").await;
        assert!(matches!(result, Err(TaskQueueError::Store(_))));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }
}
