//! # Handler Registry
//!
//! Maps task-type strings to pluggable [`TaskHandler`] implementations.
//!
//! ```rust
//! use std::sync::Arc;
//! use taskqueue_core::registry::{builtin, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new();
//! builtin::register_builtin_handlers(&mut registry, 1.0).unwrap();
//! assert!(registry.is_supported("email-send"));
//! let shared = Arc::new(registry);
//! # drop(shared);
//! ```

pub mod builtin;
pub mod handler;
pub mod handler_registry;

pub use handler::{HandlerError, TaskHandler};
pub use handler_registry::HandlerRegistry;
