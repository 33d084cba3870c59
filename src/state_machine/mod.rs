// Task lifecycle state machine.
//
// Pure transition logic: which events are legal from which states, the guards
// that protect the retry budget, and the field updates each transition makes.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use guards::StateGuard;
pub use states::TaskStatus;
pub use task_state_machine::{TaskStateMachine, TransitionRecord};
