//! # Submission Router
//!
//! Caller-facing operations: submit, status, listing, cancel, metrics and
//! dead-letter queries.
//!
//! A submission is validated before anything is written, persisted as
//! `PENDING`, and only then published to its tier channel. If the publish
//! fails the record stays `PENDING` and startup recovery re-publishes it;
//! the caller still sees the channel error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::context::SystemContext;
use crate::error::{Result, TaskQueueError};
use crate::events::StatusEvent;
use crate::logging::log_task_operation;
use crate::messaging::TaskMessage;
use crate::metrics::MetricsSnapshot;
use crate::models::{DeadLetterRecord, Page, Priority, Task, TaskId, TaskQuery, TaskView};
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};

/// Conditional-write attempts before a cancel gives up on a contended record
const CANCEL_WRITE_ATTEMPTS: usize = 3;

/// Submission input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    pub task_type: String,
    pub priority: Priority,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl SubmitTaskRequest {
    pub fn new(task_type: impl Into<String>, priority: Priority, payload: Option<Value>) -> Self {
        Self {
            task_type: task_type.into(),
            priority,
            payload,
            not_before: None,
            max_attempts: None,
        }
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Acknowledgement returned to the submitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    pub estimated_wait_ms: u64,
    /// Compact form, `"45s"` or `"3m"`
    pub estimated_wait_time: String,
}

impl TaskSubmission {
    pub fn estimated_wait(&self) -> Duration {
        Duration::from_millis(self.estimated_wait_ms)
    }
}

/// `depth × per-task duration`, rounded to whole milliseconds
pub fn estimate_wait_ms(depth: u64, per_task_ms: f64) -> u64 {
    let estimate = (depth as f64 * per_task_ms.max(0.0)).round();
    if estimate >= u64::MAX as f64 {
        u64::MAX
    } else {
        estimate as u64
    }
}

/// Seconds below one minute, whole minutes otherwise
pub fn format_wait(wait_ms: u64) -> String {
    let seconds = wait_ms / 1000;
    if seconds < 60 {
        format!("{seconds}s")
    } else {
        format!("{}m", seconds / 60)
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRouter {
    context: SystemContext,
}

impl SubmissionRouter {
    pub fn new(context: SystemContext) -> Self {
        Self { context }
    }

    pub async fn submit(&self, request: SubmitTaskRequest) -> Result<TaskSubmission> {
        let SubmitTaskRequest {
            task_type,
            priority,
            payload,
            not_before,
            max_attempts,
        } = request;

        if !self.context.registry.is_supported(&task_type) {
            debug!(task_type = %task_type, "Rejected submission for unregistered type");
            return Err(TaskQueueError::unsupported_task_type(task_type));
        }
        let payload = match payload {
            Some(Value::Object(document)) => Value::Object(document),
            None | Some(Value::Null) => {
                return Err(TaskQueueError::invalid_payload("payload is required"))
            }
            Some(_) => {
                return Err(TaskQueueError::invalid_payload(
                    "payload must be a key/value document",
                ))
            }
        };
        let max_attempts =
            max_attempts.unwrap_or(self.context.config.execution.default_max_attempts);
        if max_attempts < 1 {
            return Err(TaskQueueError::validation("maxAttempts", "must be at least 1"));
        }

        let task = Task::new(task_type, priority, payload, max_attempts, not_before);
        if !self.context.store.insert(&task).await? {
            return Err(TaskQueueError::Internal(format!(
                "task id collision on {}",
                task.task_id
            )));
        }

        let message = TaskMessage::for_task(&task);
        match task.delay_until_due(Utc::now()) {
            Some(delay) => self.context.scheduler.schedule(message, delay),
            None => {
                if let Err(e) = self.context.channels.publish(message).await {
                    self.roll_back(&task).await;
                    return Err(e.into());
                }
            }
        }

        self.context.metrics.record_submitted(priority);
        self.context
            .broadcaster
            .publish(&task.task_id, TaskStatus::Pending, task.created_at);
        log_task_operation(
            "submit",
            &task.task_id,
            &task.task_type,
            task.priority,
            task.status,
            None,
        );

        let depth = self.context.channels.depth(priority).await.unwrap_or(0);
        let per_task_ms = self
            .context
            .metrics
            .mean_processing_ms()
            .unwrap_or(self.context.config.execution.default_task_duration_ms as f64);
        let estimated_wait_ms = estimate_wait_ms(depth, per_task_ms);

        Ok(TaskSubmission {
            task_id: task.task_id,
            task_type: task.task_type,
            priority: task.priority,
            status: task.status,
            created_at: task.created_at,
            not_before: task.not_before,
            estimated_wait_ms,
            estimated_wait_time: format_wait(estimated_wait_ms),
        })
    }

    /// Undo the insert of a task that never reached its channel, so a failed
    /// submission leaves no record behind
    async fn roll_back(&self, task: &Task) {
        match self.context.store.delete(&task.task_id, task.version).await {
            Ok(true) => debug!(task_id = %task.task_id, "Rolled back unpublished submission"),
            Ok(false) => warn!(task_id = %task.task_id, "Unpublished submission changed before rollback"),
            Err(e) => warn!(
                task_id = %task.task_id,
                error = %e,
                "Rollback of unpublished submission failed, record left for recovery"
            ),
        }
    }

    pub async fn get_status(&self, task_id: &TaskId) -> Result<TaskView> {
        self.context
            .store
            .load(task_id)
            .await?
            .map(|task| task.view())
            .ok_or_else(|| TaskQueueError::not_found(task_id))
    }

    /// Follow one task's status changes. A task that is already terminal gets
    /// a closed receiver, so no topic is opened for it.
    pub async fn subscribe_status(&self, task_id: &TaskId) -> Result<broadcast::Receiver<StatusEvent>> {
        let task = self
            .context
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| TaskQueueError::not_found(task_id))?;
        if task.status.is_terminal() {
            return Ok(self.context.broadcaster.closed_topic());
        }
        Ok(self.context.broadcaster.subscribe_task(task_id))
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Page<TaskView>> {
        let page = self.context.store.query(query).await?;
        Ok(page.map(|task| task.view()))
    }

    /// Cancel a `PENDING` task. Any other status is a conflict and nothing is
    /// written. Messages already in a channel are skipped when dequeued.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<TaskView> {
        for _ in 0..CANCEL_WRITE_ATTEMPTS {
            let mut task = self
                .context
                .store
                .load(task_id)
                .await?
                .ok_or_else(|| TaskQueueError::not_found(task_id))?;

            let status = task.status;
            TaskStateMachine::apply(&mut task, &TaskEvent::Cancel, Utc::now())
                .map_err(|e| TaskQueueError::from_state_machine(task_id, status, e))?;

            if self.context.store.update(&task).await? {
                task.version += 1;
                self.context.metrics.record_cancelled();
                self.context.broadcaster.publish(
                    &task.task_id,
                    task.status,
                    task.completed_at.unwrap_or_else(Utc::now),
                );
                log_task_operation(
                    "cancel",
                    &task.task_id,
                    &task.task_type,
                    task.priority,
                    task.status,
                    None,
                );
                return Ok(task.view());
            }
            debug!(task_id = %task_id, "Record changed during cancel, re-reading");
        }

        info!(task_id = %task_id, "Cancel gave up after repeated concurrent updates");
        Err(TaskQueueError::Internal(format!(
            "cancel of {task_id} lost {CANCEL_WRITE_ATTEMPTS} consecutive write races"
        )))
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.context.registry.list_types()
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        Ok(self.context.metrics.snapshot().await?)
    }

    pub async fn dead_letters(&self, page: u32, size: u32) -> Result<Page<DeadLetterRecord>> {
        Ok(self.context.dead_letters.list(page, size).await?)
    }

    pub async fn dead_letter_for(&self, task_id: &TaskId) -> Result<Option<DeadLetterRecord>> {
        Ok(self.context.dead_letters.find_by_task_id(task_id).await?)
    }

    pub async fn dead_letter_count_by_type(&self, task_type: &str) -> Result<u64> {
        Ok(self.context.dead_letters.count_by_task_type(task_type).await?)
    }
}
