//! # Error Types
//!
//! `TaskQueueError` is the boundary error returned by the public operations.
//! Component errors (store, channel, state machine, handler, configuration)
//! convert into it with `?`.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::database::StoreError;
use crate::messaging::ChannelError;
use crate::models::TaskId;
use crate::registry::HandlerError;
use crate::state_machine::{StateMachineError, TaskStatus};

#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// No handler is registered for the requested task type
    #[error("Unsupported task type: {task_type}")]
    UnsupportedTaskType { task_type: String },

    /// Payload missing or not a key/value document
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// Any other rejected submission field
    #[error("Validation error: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Task not found: {task_id}")]
    NotFound { task_id: TaskId },

    /// Operation not permitted from the task's current status; nothing was mutated
    #[error("State conflict for task {task_id} in status {status}: {reason}")]
    StateConflict {
        task_id: TaskId,
        status: TaskStatus,
        reason: String,
    },

    #[error("Handler execution failed: {0}")]
    HandlerExecution(#[from] HandlerError),

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Handler registration error: {0}")]
    Registration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskQueueError {
    pub fn unsupported_task_type(task_type: impl Into<String>) -> Self {
        Self::UnsupportedTaskType {
            task_type: task_type.into(),
        }
    }

    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(task_id: &TaskId) -> Self {
        Self::NotFound {
            task_id: task_id.clone(),
        }
    }

    pub fn state_conflict(task_id: &TaskId, status: TaskStatus, reason: impl Into<String>) -> Self {
        Self::StateConflict {
            task_id: task_id.clone(),
            status,
            reason: reason.into(),
        }
    }

    /// Lift a state machine rejection into a conflict on a specific task
    pub fn from_state_machine(task_id: &TaskId, status: TaskStatus, err: StateMachineError) -> Self {
        Self::state_conflict(task_id, status, err.to_string())
    }

    /// Errors caused by the caller's request (4xx at an HTTP boundary)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedTaskType { .. }
                | Self::InvalidPayload { .. }
                | Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::StateConflict { .. }
        )
    }

    /// Submission validation failures; never retried, nothing persisted
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedTaskType { .. } | Self::InvalidPayload { .. } | Self::Validation { .. }
        )
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedTaskType { .. } => "unsupported_task_type",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::StateConflict { .. } => "state_conflict",
            Self::HandlerExecution(_) => "handler_execution_error",
            Self::Store(_) => "store_unavailable",
            Self::Channel(_) => "channel_unavailable",
            Self::Configuration(_) => "configuration_error",
            Self::Registration(_) => "registration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskQueueError>;
