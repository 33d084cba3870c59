//! # Schema Migrations
//!
//! The schema is small and versioned in code. Each statement is idempotent
//! (`IF NOT EXISTS`), and the whole run holds a PostgreSQL advisory lock so
//! several workers booting against the same database do not race each other.

use sqlx::PgPool;
use tracing::{debug, info};

/// Advisory lock key held for the duration of a migration run
const MIGRATION_LOCK_KEY: i64 = 0x7461_736b_7175_6575;

/// Ordered schema statements
const SCHEMA: &[(&str, &str)] = &[
    (
        "create_tasks",
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id         TEXT PRIMARY KEY,
            task_type       TEXT NOT NULL,
            priority        TEXT NOT NULL,
            priority_level  SMALLINT NOT NULL,
            status          TEXT NOT NULL,
            payload         JSONB NOT NULL,
            attempt_count   INTEGER NOT NULL DEFAULT 0,
            max_attempts    INTEGER NOT NULL,
            created_at      TIMESTAMPTZ NOT NULL,
            not_before      TIMESTAMPTZ,
            started_at      TIMESTAMPTZ,
            completed_at    TIMESTAMPTZ,
            error_message   TEXT,
            worker_id       TEXT,
            version         BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT tasks_attempts_within_budget CHECK (attempt_count <= max_attempts),
            CONSTRAINT tasks_max_attempts_positive CHECK (max_attempts >= 1)
        )
        "#,
    ),
    (
        "index_tasks_status",
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    ),
    (
        "index_tasks_priority",
        "CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks (priority_level DESC, created_at ASC)",
    ),
    (
        "index_tasks_created_at",
        "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks (created_at)",
    ),
    (
        "create_dead_letter_tasks",
        r#"
        CREATE TABLE IF NOT EXISTS dead_letter_tasks (
            id                UUID PRIMARY KEY,
            original_task_id  TEXT NOT NULL UNIQUE,
            task_type         TEXT NOT NULL,
            priority          TEXT NOT NULL,
            payload           JSONB NOT NULL,
            failure_reason    TEXT NOT NULL,
            attempt_count     INTEGER NOT NULL,
            failed_at         TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "index_dead_letter_failed_at",
        "CREATE INDEX IF NOT EXISTS idx_dead_letter_failed_at ON dead_letter_tasks (failed_at DESC)",
    ),
    (
        "index_dead_letter_task_type",
        "CREATE INDEX IF NOT EXISTS idx_dead_letter_task_type ON dead_letter_tasks (task_type)",
    ),
];

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every schema statement in order under the advisory lock
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let mut outcome = Ok(());
        for (name, statement) in SCHEMA {
            debug!(migration = %name, "Applying schema statement");
            if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
                outcome = Err(e);
                break;
            }
        }

        // Release even when a statement failed so other workers are not blocked
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        outcome?;
        info!(statements = SCHEMA.len(), "Task queue schema is up to date");
        Ok(())
    }

    /// Names of the schema statements, in application order
    pub fn statement_names() -> Vec<&'static str> {
        SCHEMA.iter().map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_names_are_unique() {
        let names = DatabaseMigrations::statement_names();
        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn test_tables_created_before_indices() {
        let names = DatabaseMigrations::statement_names();
        let tasks = names.iter().position(|n| *n == "create_tasks").unwrap();
        let index = names.iter().position(|n| *n == "index_tasks_status").unwrap();
        assert!(tasks < index);
    }
}
