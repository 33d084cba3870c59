use super::states::TaskStatus;
use thiserror::Error;

/// Errors raised while evaluating a lifecycle transition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event '{event}'")]
    InvalidTransition { from: TaskStatus, event: String },

    #[error("Task is in terminal state {status}; no transition allowed")]
    TerminalState { status: TaskStatus },

    #[error("Guard failed for event '{event}': {reason}")]
    GuardFailed { event: String, reason: String },
}

impl StateMachineError {
    pub fn guard_failed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GuardFailed {
            event: event.into(),
            reason: reason.into(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
