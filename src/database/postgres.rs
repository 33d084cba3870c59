//! # PostgreSQL Store Backend
//!
//! Runtime-checked SQLx queries against the `tasks` and `dead_letter_tasks`
//! tables created by [`super::migrations`]. Compare-and-swap updates are a
//! single `UPDATE ... WHERE version = $n`, so the database row lock is the only
//! synchronization needed between workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::{DeadLetterStore, TaskStore};
use crate::models::{DeadLetterRecord, Page, Priority, Task, TaskId, TaskQuery};
use crate::state_machine::TaskStatus;

const TASK_COLUMNS: &str = "task_id, task_type, priority, status, payload, attempt_count, \
     max_attempts, created_at, not_before, started_at, completed_at, error_message, worker_id, version";

const DEAD_LETTER_COLUMNS: &str =
    "id, original_task_id, task_type, priority, payload, failure_reason, attempt_count, failed_at";

/// Raw `tasks` row
#[derive(Debug, Clone, FromRow)]
struct TaskRow {
    task_id: String,
    task_type: String,
    priority: String,
    status: String,
    payload: serde_json::Value,
    attempt_count: i32,
    max_attempts: i32,
    created_at: DateTime<Utc>,
    not_before: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    worker_id: Option<String>,
    version: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StoreError::corrupt_record(row.task_id.clone(), message);

        let priority: Priority = row.priority.parse().map_err(corrupt)?;
        let status: TaskStatus = row.status.parse().map_err(corrupt)?;
        let attempt_count = u32::try_from(row.attempt_count)
            .map_err(|_| corrupt(format!("negative attempt_count {}", row.attempt_count)))?;
        let max_attempts = u32::try_from(row.max_attempts)
            .map_err(|_| corrupt(format!("negative max_attempts {}", row.max_attempts)))?;
        let version = u64::try_from(row.version)
            .map_err(|_| corrupt(format!("negative version {}", row.version)))?;

        Ok(Task {
            task_id: TaskId::from(row.task_id),
            task_type: row.task_type,
            priority,
            status,
            payload: row.payload,
            attempt_count,
            max_attempts,
            created_at: row.created_at,
            not_before: row.not_before,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            worker_id: row.worker_id,
            version,
        })
    }
}

/// Raw `dead_letter_tasks` row
#[derive(Debug, Clone, FromRow)]
struct DeadLetterRow {
    id: Uuid,
    original_task_id: String,
    task_type: String,
    priority: String,
    payload: serde_json::Value,
    failure_reason: String,
    attempt_count: i32,
    failed_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetterRecord {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let priority: Priority = row
            .priority
            .parse()
            .map_err(|e: String| StoreError::corrupt_record(row.id.to_string(), e))?;
        let attempt_count = u32::try_from(row.attempt_count).map_err(|_| {
            StoreError::corrupt_record(row.id.to_string(), "negative attempt_count")
        })?;

        Ok(DeadLetterRecord {
            id: row.id,
            original_task_id: TaskId::from(row.original_task_id),
            task_type: row.task_type,
            priority,
            payload: row.payload,
            failure_reason: row.failure_reason,
            attempt_count,
            failed_at: row.failed_at,
        })
    }
}

fn to_i32(value: u32, field: &str) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::query("encode", format!("{field} {value} out of range")))
}

fn to_i64(value: u64, field: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::query("encode", format!("{field} {value} out of range")))
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: &Task) -> StoreResult<bool> {
        let sql = format!(
            "INSERT INTO tasks ({TASK_COLUMNS}, priority_level) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (task_id) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(task.task_id.as_str())
            .bind(&task.task_type)
            .bind(task.priority.as_str())
            .bind(task.status.as_str())
            .bind(&task.payload)
            .bind(to_i32(task.attempt_count, "attempt_count")?)
            .bind(to_i32(task.max_attempts, "max_attempts")?)
            .bind(task.created_at)
            .bind(task.not_before)
            .bind(task.started_at)
            .bind(task.completed_at)
            .bind(&task.error_message)
            .bind(&task.worker_id)
            .bind(to_i64(task.version, "version")?)
            .bind(i16::from(task.priority.level()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, task_id: &TaskId) -> StoreResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update(&self, task: &Task) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                attempt_count = $3,
                not_before = $4,
                started_at = $5,
                completed_at = $6,
                error_message = $7,
                worker_id = $8,
                version = version + 1
            WHERE task_id = $1 AND version = $9
            "#,
        )
        .bind(task.task_id.as_str())
        .bind(task.status.as_str())
        .bind(to_i32(task.attempt_count, "attempt_count")?)
        .bind(task.not_before)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error_message)
        .bind(&task.worker_id)
        .bind(to_i64(task.version, "version")?)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(task_id = %task.task_id, version = task.version, "Compare-and-swap update lost");
        }
        Ok(applied)
    }

    async fn delete(&self, task_id: &TaskId, version: u64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_id = $1 AND version = $2")
            .bind(task_id.as_str())
            .bind(to_i64(version, "version")?)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, query: &TaskQuery) -> StoreResult<Page<Task>> {
        let status = query.status.map(|s| s.as_str());
        let size = query.effective_size();
        let direction = query.direction.sql();
        let nulls = query.direction.nulls_sql();

        // Column and direction come from closed enums, never from caller text
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY {column} {direction} {nulls}, task_id {direction} \
             LIMIT $2 OFFSET $3",
            column = query.sort_by.column(),
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(status)
            .bind(i64::from(size))
            .bind(to_i64(query.offset(), "offset")?)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE ($1::text IS NULL OR status = $1)")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        let items = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page::new(items, query.page, size, count(total)))
    }

    async fn count_all(&self) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count(total))
    }

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count(total))
    }

    async fn average_processing_ms(&self) -> StoreResult<Option<f64>> {
        let average: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) * 1000)::float8
            FROM tasks
            WHERE status = 'COMPLETED'
              AND started_at IS NOT NULL
              AND completed_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(average)
    }

    async fn find_recoverable(&self, limit: u32) -> StoreResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IN ('PENDING', 'PROCESSING') \
             ORDER BY priority_level DESC, created_at ASC \
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn append(&self, record: &DeadLetterRecord) -> StoreResult<bool> {
        let sql = format!(
            "INSERT INTO dead_letter_tasks ({DEAD_LETTER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (original_task_id) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.original_task_id.as_str())
            .bind(&record.task_type)
            .bind(record.priority.as_str())
            .bind(&record.payload)
            .bind(&record.failure_reason)
            .bind(to_i32(record.attempt_count, "attempt_count")?)
            .bind(record.failed_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_task_id(&self, task_id: &TaskId) -> StoreResult<Option<DeadLetterRecord>> {
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_tasks WHERE original_task_id = $1"
        );
        let row = sqlx::query_as::<_, DeadLetterRow>(&sql)
            .bind(task_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(DeadLetterRecord::try_from).transpose()
    }

    async fn list(&self, page: u32, size: u32) -> StoreResult<Page<DeadLetterRecord>> {
        let size = size.max(1);
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letter_tasks \
             ORDER BY failed_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, DeadLetterRow>(&sql)
            .bind(i64::from(size))
            .bind(i64::from(page) * i64::from(size))
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(DeadLetterRecord::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        let total = self.count().await?;
        Ok(Page::new(items, page, size, total))
    }

    async fn count(&self) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count(total))
    }

    async fn count_by_task_type(&self, task_type: &str) -> StoreResult<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_tasks WHERE task_type = $1")
                .bind(task_type)
                .fetch_one(&self.pool)
                .await?;
        Ok(count(total))
    }
}
