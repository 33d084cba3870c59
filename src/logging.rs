//! # Structured Logging Module
//!
//! Console logging through `tracing-subscriber`, human-readable or JSON.
//! `RUST_LOG` overrides the configured level when set.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::{Priority, TaskId};
use crate::state_machine::TaskStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            level = %config.level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for task lifecycle operations
pub fn log_task_operation(
    operation: &str,
    task_id: &TaskId,
    task_type: &str,
    priority: Priority,
    status: TaskStatus,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        task_type = %task_type,
        priority = %priority,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}
