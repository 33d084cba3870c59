use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;

use super::migrations::DatabaseMigrations;
use crate::config::DatabaseConfig;

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Build a pool from configuration and, if enabled, bring the schema up to date
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "🗄️ DATABASE: Connection pool established"
        );

        if config.run_migrations {
            DatabaseMigrations::run_all(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
