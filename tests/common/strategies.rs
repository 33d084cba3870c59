use proptest::prelude::*;

use taskqueue_core::models::Priority;
use taskqueue_core::state_machine::{TaskEvent, TaskStatus};

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)]
}

pub fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Processing),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
        Just(TaskStatus::Cancelled),
    ]
}

pub fn event_strategy() -> impl Strategy<Value = TaskEvent> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(TaskEvent::start),
        Just(TaskEvent::Complete),
        "[a-z ]{1,16}".prop_map(TaskEvent::retry_with_error),
        "[a-z ]{1,16}".prop_map(TaskEvent::fail_with_error),
        Just(TaskEvent::Cancel),
    ]
}

/// Handler outcomes for successive attempts, `true` meaning success
pub fn attempt_outcomes_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..12)
}
