use async_trait::async_trait;
use thiserror::Error;

/// Failure raised by, or on behalf of, a task handler. Never surfaced to the
/// submitter; routed through the retry policy instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("{message}")]
    Failed { message: String },

    #[error("Invalid payload field '{field}': {reason}")]
    InvalidPayload { field: String, reason: String },

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    #[error("No handler registered for task type: {task_type}")]
    Unsupported { task_type: String },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_payload(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// One executable capability, keyed by task type in the registry.
///
/// Delivery is at-least-once, so implementations should be idempotent or
/// tolerate re-invocation with the same payload.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn execute(&self, payload: &serde_json::Value) -> Result<(), HandlerError>;

    /// Short label for logs
    fn description(&self) -> &str {
        "task handler"
    }
}

/// Fetch a required string field from a key/value payload
pub fn required_str<'a>(payload: &'a serde_json::Value, field: &str) -> Result<&'a str, HandlerError> {
    match payload.get(field) {
        Some(serde_json::Value::String(value)) if !value.is_empty() => Ok(value.as_str()),
        Some(serde_json::Value::String(_)) => Err(HandlerError::invalid_payload(field, "must not be empty")),
        Some(_) => Err(HandlerError::invalid_payload(field, "must be a string")),
        None => Err(HandlerError::invalid_payload(field, "is required")),
    }
}
