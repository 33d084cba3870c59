//! # Orchestration
//!
//! Everything that moves a task through its lifecycle once it is accepted.
//!
//! ## Components
//!
//! - [`SubmissionRouter`]: validates, persists and publishes submissions;
//!   status, listing, cancel, metrics and dead-letter queries
//! - [`TierWorkerPool`]: elastic execution units per priority tier
//! - [`TaskProcessor`]: resolves one delivery to a terminal or retry outcome
//! - [`RetryPolicy`]: pure retry/terminal decision with capped exponential backoff
//! - [`DelayedPublisher`]: non-blocking timed re-enqueue
//! - [`TaskQueueSystem`]: builds the shared [`SystemContext`] and owns the pools
//!
//! ## Flow
//!
//! ```text
//! submit -> store (PENDING) -> tier channel -> worker unit
//!        -> PROCESSING -> handler -> COMPLETED
//!                                 -> PENDING + delayed re-enqueue
//!                                 -> FAILED + dead-letter record
//! ```

pub mod bootstrap;
pub mod context;
pub mod delayed_publisher;
pub mod retry_policy;
pub mod submission;
pub mod task_processor;
pub mod worker_pool;

pub use bootstrap::{connect_postgres_stores, RecoveryReport, TaskQueueSystem, TaskQueueSystemBuilder};
pub use context::SystemContext;
pub use delayed_publisher::DelayedPublisher;
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use submission::{format_wait, SubmissionRouter, SubmitTaskRequest, TaskSubmission};
pub use task_processor::{ProcessOutcome, TaskProcessor};
pub use worker_pool::{PoolStats, TierWorkerPool};
