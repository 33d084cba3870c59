//! # Channel Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Channel closed: {channel}")]
    Closed { channel: String },

    #[error("Channel operation failed: {channel}: {operation}: {message}")]
    Operation {
        channel: String,
        operation: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Unknown channel: {channel}")]
    UnknownChannel { channel: String },
}

impl ChannelError {
    pub fn closed(channel: impl Into<String>) -> Self {
        Self::Closed {
            channel: channel.into(),
        }
    }

    pub fn operation(
        channel: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Operation {
            channel: channel.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;
