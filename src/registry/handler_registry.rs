//! # Handler Registry
//!
//! Explicit map from task-type string to one [`TaskHandler`]. Built once at
//! startup from a declared set of handlers, then shared read-only behind an
//! `Arc`; there is no discovery and no mutation after construction.
//!
//! ```rust
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use taskqueue_core::registry::{HandlerError, HandlerRegistry, TaskHandler};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl TaskHandler for Echo {
//!     async fn execute(&self, payload: &serde_json::Value) -> Result<(), HandlerError> {
//!         if payload.get("fail").is_some() {
//!             return Err(HandlerError::Failed { message: "asked to fail".into() });
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let registry = HandlerRegistry::new().with_handler("echo", Arc::new(Echo)).unwrap();
//! assert!(registry.execute("echo", &serde_json::json!({})).await.is_ok());
//! assert!(registry.execute("echo", &serde_json::json!({"fail": true})).await.is_err());
//! assert!(registry.execute("missing", &serde_json::json!({})).await.is_err());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::handler::{HandlerError, TaskHandler};
use crate::error::{Result, TaskQueueError};

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`. A second registration for the same
    /// type is rejected rather than overwriting the first.
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(TaskQueueError::Registration(
                "task type must not be empty".to_string(),
            ));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(TaskQueueError::Registration(format!(
                "handler already registered for task type '{task_type}'"
            )));
        }

        info!(task_type = %task_type, handler = handler.description(), "Registered task handler");
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_handler(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        self.register(task_type, handler)?;
        Ok(self)
    }

    /// Run the handler for `task_type` in the caller's execution slot
    pub async fn execute(&self, task_type: &str, payload: &serde_json::Value) -> std::result::Result<(), HandlerError> {
        let handler = self.handlers.get(task_type).ok_or_else(|| HandlerError::Unsupported {
            task_type: task_type.to_string(),
        })?;
        debug!(task_type, "Dispatching to task handler");
        handler.execute(payload).await
    }

    pub fn is_supported(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered types, sorted so the snapshot is stable
    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
