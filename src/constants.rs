//! # System Constants
//!
//! Queue names, lifecycle event names and operational defaults shared by the
//! submission path, the worker pools and the metrics layer.

use crate::models::Priority;
use crate::state_machine::TaskStatus;

/// Channel names, one per priority tier plus the dead-letter channel
pub mod queues {
    pub const HIGH_PRIORITY_QUEUE: &str = "queue.tasks.high";
    pub const MEDIUM_PRIORITY_QUEUE: &str = "queue.tasks.medium";
    pub const LOW_PRIORITY_QUEUE: &str = "queue.tasks.low";
    pub const DEAD_LETTER_QUEUE: &str = "queue.tasks.dlq";
}

/// Lifecycle event names used in structured logs
pub mod events {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_DEAD_LETTERED: &str = "task.dead_lettered";
    pub const TASK_REDELIVERY_SKIPPED: &str = "task.redelivery_skipped";
}

/// System-wide defaults
pub mod system {
    /// Default retry budget for a task when the caller does not override it
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Default message time-to-live on every tier channel (1 hour)
    pub const DEFAULT_MESSAGE_TTL_SECONDS: u64 = 3600;
    /// Backoff base delay
    pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
    /// Backoff cap
    pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;
    /// Assumed per-task duration for wait estimates before any task completed
    pub const DEFAULT_TASK_DURATION_MS: u64 = 2_000;
    /// Prefix of generated task identifiers
    pub const TASK_ID_PREFIX: &str = "task_";
    /// Prefix of generated worker identifiers
    pub const WORKER_ID_PREFIX: &str = "worker_";
    /// Default page size for task listings
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    /// Upper bound on page size for task listings
    pub const MAX_PAGE_SIZE: u32 = 500;
}

/// Status groupings used by queries and metrics
pub mod status_groups {
    use super::TaskStatus;

    /// States from which no further transition is allowed
    pub const TERMINAL_STATES: &[TaskStatus] = &[
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// States that still hold a claim on channel capacity
    pub const ACTIVE_STATES: &[TaskStatus] = &[TaskStatus::Pending, TaskStatus::Processing];
}

/// Channel name for a priority tier
pub fn queue_for_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::High => queues::HIGH_PRIORITY_QUEUE,
        Priority::Medium => queues::MEDIUM_PRIORITY_QUEUE,
        Priority::Low => queues::LOW_PRIORITY_QUEUE,
    }
}
