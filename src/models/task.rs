//! # Task Model
//!
//! The durable record of one unit of work. The record is owned by the task
//! store; workers only ever hold a transient processing lease (worker id plus
//! start time) while the status is `PROCESSING`.
//!
//! ## Versioning
//!
//! Every record carries a `version` that the store bumps on each successful
//! write. Updates are compare-and-swap on that version, which is what lets a
//! duplicate delivery lose the race cleanly instead of double-applying a
//! transition.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::priority::Priority;
use crate::constants::system;
use crate::state_machine::TaskStatus;

/// Globally unique, never reused task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh identifier (`task_<32 hex chars>`)
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            system::TASK_ID_PREFIX,
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A task record as persisted by the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Opaque document handed to the handler unexamined
    pub payload: serde_json::Value,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    /// Optimistic concurrency token, bumped by the store on every write
    pub version: u64,
}

impl Task {
    /// Build a fresh `PENDING` record with a newly generated id
    pub fn new(
        task_type: impl Into<String>,
        priority: Priority,
        payload: serde_json::Value,
        max_attempts: u32,
        not_before: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task_id: TaskId::generate(),
            task_type: task_type.into(),
            priority,
            status: TaskStatus::Pending,
            payload,
            attempt_count: 0,
            max_attempts,
            created_at: Utc::now(),
            not_before,
            started_at: None,
            completed_at: None,
            error_message: None,
            worker_id: None,
            version: 0,
        }
    }

    /// Whether the scheduling gate has opened
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }

    /// Time left until `not_before`, if it lies in the future
    pub fn delay_until_due(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.not_before
            .filter(|at| *at > now)
            .and_then(|at| (at - now).to_std().ok())
    }

    /// Whether the processing lease is older than `lease_timeout`
    pub fn lease_expired(&self, now: DateTime<Utc>, lease_timeout: Duration) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        let Some(started_at) = self.started_at else {
            return true;
        };
        ChronoDuration::from_std(lease_timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout))
            .is_some_and(|deadline| deadline <= now)
    }

    /// Attempts left before the task is dead-lettered
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    /// Read-only view returned to callers
    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.task_id.clone(),
            task_type: self.task_type.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
        }
    }
}

/// Status query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
}
