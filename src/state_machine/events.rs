use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A worker took the task; records the processing lease
    Start { worker_id: String },
    /// The handler succeeded
    Complete,
    /// The handler failed and the retry budget allows another attempt
    Retry { error: String },
    /// The handler failed on the last permitted attempt
    Fail { error: String },
    /// Explicit cancellation by a caller
    Cancel,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Complete => "complete",
            Self::Retry { .. } => "retry",
            Self::Fail { .. } => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Retry { error } | Self::Fail { error } => Some(error),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Fail { .. } | Self::Cancel)
    }

    /// Check if this event consumes one attempt of the retry budget
    pub fn consumes_attempt(&self) -> bool {
        matches!(self, Self::Retry { .. } | Self::Fail { .. })
    }
}

impl TaskEvent {
    pub fn start(worker_id: impl Into<String>) -> Self {
        Self::Start {
            worker_id: worker_id.into(),
        }
    }

    pub fn retry_with_error(error: impl Into<String>) -> Self {
        Self::Retry {
            error: error.into(),
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
        }
    }
}
