//! # Task Queue Worker
//!
//! Standalone process running the tier worker pools with the built-in
//! handlers. Configuration comes from `config/taskqueue*.toml` and
//! `TASKQUEUE__*` environment variables; `Ctrl-C` triggers a graceful
//! shutdown.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use taskqueue_core::config::{ConfigManager, StorageBackend};
use taskqueue_core::logging::init_structured_logging;
use taskqueue_core::orchestration::{connect_postgres_stores, TaskQueueSystem};
use taskqueue_core::registry::{builtin, HandlerRegistry};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_manager = ConfigManager::load().context("failed to load configuration")?;
    let config = config_manager.config().clone();
    init_structured_logging(&config.logging);

    info!(
        environment = %config_manager.environment(),
        config = %config_manager.debug_config(),
        "⚙️ CONFIG: Loaded task queue configuration"
    );

    let mut registry = HandlerRegistry::new();
    builtin::register_builtin_handlers(&mut registry, config.execution.builtin_latency_scale)
        .context("failed to register built-in handlers")?;

    let mut builder = TaskQueueSystem::builder(config.clone()).with_registry(registry);
    if config.storage.backend == StorageBackend::Postgres {
        let (store, dead_letters) = connect_postgres_stores(&config.database)
            .await
            .context("failed to connect PostgreSQL stores")?;
        builder = builder.with_stores(store, dead_letters);
    }
    let system = Arc::new(builder.build().context("failed to build task queue")?);

    let report = system.recover().await.context("startup recovery failed")?;
    info!(recovered = report.total(), "🔄 RECOVERY: Startup recovery finished");

    system.start();

    let reporter = {
        let system = Arc::clone(&system);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match system.router().metrics().await {
                    Ok(snapshot) => info!(
                        total = snapshot.total_tasks,
                        pending = snapshot.pending_tasks,
                        processing = snapshot.processing_tasks,
                        completed = snapshot.completed_tasks,
                        failed = snapshot.failed_tasks,
                        success_rate = snapshot.success_rate,
                        backlog = snapshot.total_channel_depth(),
                        "📊 METRICS: Queue snapshot"
                    ),
                    Err(e) => warn!(error = %e, "Metrics snapshot unavailable"),
                }
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("🛑 Shutdown signal received");

    reporter.abort();
    system.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}
