//! # System Context
//!
//! Shared handles every orchestration component is built from. Cloning a
//! context is cheap; all heavy members are behind `Arc`s.

use std::sync::Arc;
use uuid::Uuid;

use super::delayed_publisher::DelayedPublisher;
use super::retry_policy::RetryPolicy;
use crate::config::TaskQueueConfig;
use crate::database::{DeadLetterStore, TaskStore};
use crate::events::StatusBroadcaster;
use crate::messaging::PriorityChannelSet;
use crate::metrics::MetricsAggregator;
use crate::registry::HandlerRegistry;

#[derive(Clone)]
pub struct SystemContext {
    pub config: Arc<TaskQueueConfig>,
    pub store: Arc<dyn TaskStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub channels: PriorityChannelSet,
    pub registry: Arc<HandlerRegistry>,
    pub metrics: Arc<MetricsAggregator>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub retry_policy: RetryPolicy,
    pub scheduler: DelayedPublisher,
    /// Distinguishes worker ids of this process from those of other instances
    pub instance_id: String,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("instance_id", &self.instance_id)
            .field("handlers", &self.registry.list_types())
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl SystemContext {
    pub fn new(
        config: Arc<TaskQueueConfig>,
        store: Arc<dyn TaskStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        channels: PriorityChannelSet,
        registry: Arc<HandlerRegistry>,
        broadcaster: Arc<StatusBroadcaster>,
    ) -> Self {
        let metrics = Arc::new(MetricsAggregator::new(
            Arc::clone(&store),
            channels.clone(),
            std::time::Duration::from_millis(config.metrics.cache_ttl_ms),
            config.metrics.otel_enabled,
        ));
        let retry_policy = RetryPolicy::from_config(&config.backoff);
        let scheduler = DelayedPublisher::new(channels.clone());
        let instance_id = Uuid::new_v4().simple().to_string()[..8].to_string();

        Self {
            config,
            store,
            dead_letters,
            channels,
            registry,
            metrics,
            broadcaster,
            retry_policy,
            scheduler,
            instance_id,
        }
    }
}
