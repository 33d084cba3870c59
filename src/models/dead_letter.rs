use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::priority::Priority;
use super::task::{Task, TaskId};

/// Permanent record of a task that exhausted its retry budget.
///
/// Created exactly once per task by the terminal branch of the retry policy;
/// stores key it by `original_task_id` so a replayed write is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub original_task_id: TaskId,
    pub task_type: String,
    /// Tier the task was submitted on, kept so operators can re-submit it as-is
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub attempt_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    /// Snapshot a task at the moment it fails terminally
    pub fn from_task(task: &Task, failure_reason: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            payload: task.payload.clone(),
            failure_reason: failure_reason.into(),
            attempt_count,
            failed_at: Utc::now(),
        }
    }
}
