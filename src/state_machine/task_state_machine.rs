use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    guards::{AttemptBudgetGuard, DueForExecutionGuard, RetryBudgetGuard, StateGuard},
    states::TaskStatus,
};
use crate::models::Task;

/// Record of one applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// Task lifecycle state machine.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED
///                       -> PENDING (retry, attempt + 1)
///                       -> FAILED  (attempt + 1 == max attempts)
/// PENDING -> CANCELLED
/// ```
///
/// Stateless: it validates an event against a record and mutates the record in
/// place. Persisting the result is the caller's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskStatus,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskStatus> {
        if current_state.is_terminal() {
            return Err(StateMachineError::TerminalState {
                status: current_state,
            });
        }

        let target = match (current_state, event) {
            (TaskStatus::Pending, TaskEvent::Start { .. }) => TaskStatus::Processing,
            (TaskStatus::Pending, TaskEvent::Cancel) => TaskStatus::Cancelled,

            (TaskStatus::Processing, TaskEvent::Complete) => TaskStatus::Completed,
            (TaskStatus::Processing, TaskEvent::Retry { .. }) => TaskStatus::Pending,
            (TaskStatus::Processing, TaskEvent::Fail { .. }) => TaskStatus::Failed,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Validate and apply `event` to `task`, updating status, attempt count,
    /// lease and timestamps.
    pub fn apply(
        task: &mut Task,
        event: &TaskEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<TransitionRecord> {
        let from = task.status;
        let to = Self::determine_target_state(from, event)?;

        Self::check_guards(task, event, now)?;

        match event {
            TaskEvent::Start { worker_id } => {
                task.worker_id = Some(worker_id.clone());
                task.started_at = Some(now);
            }
            TaskEvent::Complete => {
                task.completed_at = Some(now);
            }
            TaskEvent::Retry { error } => {
                task.attempt_count += 1;
                task.error_message = Some(error.clone());
                task.worker_id = None;
            }
            TaskEvent::Fail { error } => {
                task.attempt_count += 1;
                task.error_message = Some(error.clone());
                task.completed_at = Some(now);
            }
            TaskEvent::Cancel => {
                task.completed_at = Some(now);
            }
        }
        task.status = to;

        Ok(TransitionRecord {
            from,
            to,
            event: event.event_type().to_string(),
            at: now,
        })
    }

    fn check_guards(
        task: &Task,
        event: &TaskEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<()> {
        match event {
            TaskEvent::Start { .. } => DueForExecutionGuard { now }.check(task),
            TaskEvent::Retry { .. } => RetryBudgetGuard.check(task),
            TaskEvent::Fail { .. } => AttemptBudgetGuard.check(task),
            TaskEvent::Complete | TaskEvent::Cancel => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use serde_json::json;

    fn task(max_attempts: u32) -> Task {
        Task::new("email-send", Priority::High, json!({}), max_attempts, None)
    }

    #[test]
    fn test_happy_path() {
        let mut task = task(3);
        let now = Utc::now();

        let record = TaskStateMachine::apply(&mut task, &TaskEvent::start("worker_1"), now).unwrap();
        assert_eq!(record.from, TaskStatus::Pending);
        assert_eq!(record.to, TaskStatus::Processing);
        assert_eq!(task.worker_id.as_deref(), Some("worker_1"));
        assert_eq!(task.started_at, Some(now));

        TaskStateMachine::apply(&mut task, &TaskEvent::Complete, now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(now));
        assert_eq!(task.attempt_count, 0);
    }

    #[test]
    fn test_retry_increments_attempts_and_releases_lease() {
        let mut task = task(3);
        let now = Utc::now();
        TaskStateMachine::apply(&mut task, &TaskEvent::start("w"), now).unwrap();
        TaskStateMachine::apply(&mut task, &TaskEvent::retry_with_error("boom"), now).unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("boom"));
        assert!(task.worker_id.is_none());
    }

    #[test]
    fn test_retry_guard_blocks_last_attempt() {
        let mut task = task(1);
        let now = Utc::now();
        TaskStateMachine::apply(&mut task, &TaskEvent::start("w"), now).unwrap();

        let err = TaskStateMachine::apply(&mut task, &TaskEvent::retry_with_error("x"), now)
            .unwrap_err();
        assert!(matches!(err, StateMachineError::GuardFailed { .. }));
        assert_eq!(task.status, TaskStatus::Processing);

        TaskStateMachine::apply(&mut task, &TaskEvent::fail_with_error("x"), now).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt_count, 1);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            TaskEvent::start("w"),
            TaskEvent::Complete,
            TaskEvent::retry_with_error("e"),
            TaskEvent::fail_with_error("e"),
            TaskEvent::Cancel,
        ];
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for event in &events {
                let mut task = task(3);
                task.status = terminal;
                let before = task.clone();
                let err = TaskStateMachine::apply(&mut task, event, Utc::now()).unwrap_err();
                assert_eq!(err, StateMachineError::TerminalState { status: terminal });
                assert_eq!(task, before, "record must be unchanged");
            }
        }
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut pending = task(3);
        TaskStateMachine::apply(&mut pending, &TaskEvent::Cancel, Utc::now()).unwrap();
        assert_eq!(pending.status, TaskStatus::Cancelled);

        let mut processing = task(3);
        processing.status = TaskStatus::Processing;
        let err = TaskStateMachine::apply(&mut processing, &TaskEvent::Cancel, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_start_waits_for_not_before() {
        let now = Utc::now();
        let mut task = Task::new(
            "x",
            Priority::Low,
            json!({}),
            3,
            Some(now + chrono::Duration::seconds(60)),
        );
        let err = TaskStateMachine::apply(&mut task, &TaskEvent::start("w"), now).unwrap_err();
        assert!(matches!(err, StateMachineError::GuardFailed { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let err =
            TaskStateMachine::determine_target_state(TaskStatus::Pending, &TaskEvent::Complete)
                .unwrap_err();
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: TaskStatus::Pending,
                event: "complete".to_string()
            }
        );
    }
}
