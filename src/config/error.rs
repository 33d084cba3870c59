//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A source could not be read or parsed
    #[error("Failed to load configuration from {source_name}: {error}")]
    LoadError { source_name: String, error: String },

    /// Layered sources did not deserialize into the configuration shape
    #[error("Invalid configuration shape: {error}")]
    DeserializationError { error: String },

    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::LoadError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: ToString, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    /// Name of the offending field, when the error is about one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingRequiredField { field, .. } | Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::DeserializationError {
            error: err.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
