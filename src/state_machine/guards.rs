use super::errors::{StateMachineError, StateMachineResult};
use crate::models::Task;

/// Precondition checked before a transition is applied
pub trait StateGuard {
    /// Check if the transition is allowed for this task
    fn check(&self, task: &Task) -> StateMachineResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// A retry must leave at least one attempt in the budget
pub struct RetryBudgetGuard;

impl StateGuard for RetryBudgetGuard {
    fn check(&self, task: &Task) -> StateMachineResult<()> {
        if task.attempt_count.saturating_add(1) < task.max_attempts {
            Ok(())
        } else {
            Err(StateMachineError::guard_failed(
                "retry",
                format!(
                    "attempt {} of {} exhausts the retry budget",
                    task.attempt_count + 1,
                    task.max_attempts
                ),
            ))
        }
    }

    fn description(&self) -> &'static str {
        "Retry leaves budget for another attempt"
    }
}

/// A terminal failure may not push the attempt count past the budget
pub struct AttemptBudgetGuard;

impl StateGuard for AttemptBudgetGuard {
    fn check(&self, task: &Task) -> StateMachineResult<()> {
        if task.attempt_count < task.max_attempts {
            Ok(())
        } else {
            Err(StateMachineError::guard_failed(
                "fail",
                format!(
                    "attempt count {} already at max attempts {}",
                    task.attempt_count, task.max_attempts
                ),
            ))
        }
    }

    fn description(&self) -> &'static str {
        "Attempt count stays within max attempts"
    }
}

/// Starting requires an open scheduling gate
pub struct DueForExecutionGuard {
    pub now: chrono::DateTime<chrono::Utc>,
}

impl StateGuard for DueForExecutionGuard {
    fn check(&self, task: &Task) -> StateMachineResult<()> {
        if task.is_due(self.now) {
            Ok(())
        } else {
            Err(StateMachineError::guard_failed(
                "start",
                format!("task is not due before {:?}", task.not_before),
            ))
        }
    }

    fn description(&self) -> &'static str {
        "Task scheduling gate is open"
    }
}
