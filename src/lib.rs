#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Task Queue Core
//!
//! Priority-tiered task queue with durable lifecycle tracking, elastic
//! per-tier workers and retry-with-backoff ending in success or a permanent
//! dead-letter record.
//!
//! ## Overview
//!
//! Tasks are submitted with a type, a priority (HIGH, MEDIUM, LOW) and an
//! opaque payload. Each is persisted as `PENDING`, published to its tier's
//! channel and executed by a worker from that tier's pool through the
//! handler registered for its type. Failures are retried with capped
//! exponential backoff by a timer that never holds a worker; a task that
//! runs out of attempts becomes `FAILED` with exactly one dead-letter record.
//!
//! ## Guarantees
//!
//! - Handler invocation is at-least-once; terminal status recording is
//!   exactly-once (compare-and-swap on the record version)
//! - FIFO within a tier only
//! - Cancellation is best-effort and applies to `PENDING` tasks only
//!
//! ## Module Organization
//!
//! - [`models`] - Task, dead-letter and query types
//! - [`state_machine`] - Lifecycle transitions and guards
//! - [`database`] - Task and dead-letter store contracts, in-memory and PostgreSQL backends
//! - [`messaging`] - Per-tier delivery channels
//! - [`registry`] - Handler registry and built-in handlers
//! - [`orchestration`] - Submission, workers, retry policy, bootstrap
//! - [`metrics`] - Lock-free counters and cached snapshots
//! - [`events`] - Status fan-out
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use taskqueue_core::config::TaskQueueConfig;
//! use taskqueue_core::models::Priority;
//! use taskqueue_core::orchestration::{SubmitTaskRequest, TaskQueueSystem};
//! use taskqueue_core::registry::{builtin, HandlerRegistry};
//!
//! # async fn example() -> taskqueue_core::Result<()> {
//! let mut registry = HandlerRegistry::new();
//! builtin::register_builtin_handlers(&mut registry, 1.0)?;
//!
//! let system = TaskQueueSystem::builder(TaskQueueConfig::default())
//!     .with_registry(registry)
//!     .build()?;
//! system.start();
//!
//! let submission = system
//!     .router()
//!     .submit(SubmitTaskRequest::new(
//!         "email-send",
//!         Priority::High,
//!         Some(json!({"to": "ops@example.com", "subject": "hello"})),
//!     ))
//!     .await?;
//! println!("queued {} (wait {})", submission.task_id, submission.estimated_wait_time);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;

pub use config::{ConfigManager, TaskQueueConfig};
pub use error::{Result, TaskQueueError};
pub use models::{Priority, Task, TaskId, TaskView};
pub use orchestration::{SubmissionRouter, SubmitTaskRequest, TaskQueueSystem, TaskSubmission};
pub use state_machine::TaskStatus;
