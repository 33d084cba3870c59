//! # Channel Message Structures
//!
//! Channels carry references to task records, never the records themselves.
//! The store stays the single source of truth; a worker always reloads the
//! task on delivery before deciding what to do with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Priority, Task, TaskId};

/// Message published to a tier channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub task_type: String,
    pub priority: Priority,
    /// Attempt number this publication is for (1 on first delivery)
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            attempt: task.attempt_count + 1,
            published_at: Utc::now(),
        }
    }

    /// Serialize for transports that carry opaque bytes
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// A received, not yet acknowledged message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-local id used to acknowledge
    pub message_id: u64,
    pub message: TaskMessage,
    /// Times this message has been handed out, including this one
    pub read_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.read_count > 1
    }
}
