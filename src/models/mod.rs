//! # Data Models
//!
//! Task records, dead-letter records and listing queries. Models are plain
//! serde types; persistence lives in [`crate::database`].

pub mod dead_letter;
pub mod priority;
pub mod query;
pub mod task;

pub use dead_letter::DeadLetterRecord;
pub use priority::Priority;
pub use query::{Page, SortDirection, SortField, TaskQuery};
pub use task::{Task, TaskId, TaskView};
