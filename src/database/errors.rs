//! # Store Error Types
//!
//! Failures of the durable record stores. Every variant is an infrastructure
//! fault from the caller's point of view and surfaces as a server error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Store query error: {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("Record serialization error: {message}")]
    Serialization { message: String },

    #[error("Corrupt record {record_id}: {message}")]
    CorruptRecord { record_id: String, message: String },

    #[error("Store operation timed out: {operation}")]
    Timeout { operation: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corrupt_record(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            record_id: record_id.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => StoreError::query("database", db_err.to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout {
                operation: "acquire_connection".to_string(),
            },
            sqlx::Error::PoolClosed => StoreError::unavailable("Database pool is closed"),
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::corrupt_record(index, source.to_string())
            }
            _ => StoreError::unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
