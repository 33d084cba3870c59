//! # Record Stores
//!
//! The task store and the dead-letter store are collaborators reached only
//! through the [`TaskStore`] and [`DeadLetterStore`] contracts. Two backends
//! implement them:
//!
//! - [`memory`] - `DashMap`/`RwLock` backed, the default backend and the one the
//!   tests run against
//! - [`postgres`] - SQLx/PostgreSQL tables with status, priority and creation
//!   time indices
//!
//! ## Write discipline
//!
//! Inserts are idempotent on the task id. Updates are compare-and-swap on the
//! record `version`, so a duplicate delivery racing the original loses cleanly
//! and a replayed operation converges to the same state.

pub mod connection;
pub mod errors;
pub mod memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{DeadLetterRecord, Page, Task, TaskId, TaskQuery};
use crate::state_machine::TaskStatus;

pub use connection::DatabaseConnection;
pub use errors::{StoreError, StoreResult};
pub use memory::{InMemoryDeadLetterStore, InMemoryTaskStore};
pub use postgres::{PgDeadLetterStore, PgTaskStore};

/// Durable keyed storage of task records
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new record. Returns `false` if a record with this id already
    /// exists, in which case nothing is written.
    async fn insert(&self, task: &Task) -> StoreResult<bool>;

    async fn load(&self, task_id: &TaskId) -> StoreResult<Option<Task>>;

    /// Write `task` if the stored version still equals `task.version`; the
    /// stored copy gets `task.version + 1`. Returns `false` on a version
    /// mismatch or a missing record.
    async fn update(&self, task: &Task) -> StoreResult<bool>;

    /// Remove a record that is still at `version`. Used to roll back a
    /// submission whose publish failed. Returns `false` if the record is gone
    /// or has moved on.
    async fn delete(&self, task_id: &TaskId, version: u64) -> StoreResult<bool>;

    async fn query(&self, query: &TaskQuery) -> StoreResult<Page<Task>>;

    async fn count_all(&self) -> StoreResult<u64>;

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<u64>;

    /// Mean `completed_at - started_at` over completed tasks, in milliseconds
    async fn average_processing_ms(&self) -> StoreResult<Option<f64>>;

    /// Non-terminal records for startup recovery, highest priority first and
    /// oldest first within a tier
    async fn find_recoverable(&self, limit: u32) -> StoreResult<Vec<Task>>;

    async fn count_by_status_all(&self) -> StoreResult<HashMap<TaskStatus, u64>> {
        let mut counts = HashMap::with_capacity(TaskStatus::ALL.len());
        for status in TaskStatus::ALL {
            counts.insert(status, self.count_by_status(status).await?);
        }
        Ok(counts)
    }
}

/// Append-only storage of dead-letter records
#[async_trait]
pub trait DeadLetterStore: Send + Sync + 'static {
    /// Append a record. Idempotent per `original_task_id`: returns `false`
    /// and writes nothing if that task already has a record.
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<bool>;

    async fn find_by_task_id(&self, task_id: &TaskId) -> StoreResult<Option<DeadLetterRecord>>;

    /// Newest first, zero-indexed pages
    async fn list(&self, page: u32, size: u32) -> StoreResult<Page<DeadLetterRecord>>;

    async fn count(&self) -> StoreResult<u64>;

    async fn count_by_task_type(&self, task_type: &str) -> StoreResult<u64>;
}
