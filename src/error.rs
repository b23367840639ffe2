//! Core error type shared by every component.

use thiserror::Error;

/// One error type for the whole crate. Variants map onto the client-status
/// table the surrounding HTTP service is expected to apply; this crate never
/// encodes an HTTP status itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CrashCoreError {
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("transient persistence error: {source}")]
    Transient { source: String },

    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl CrashCoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn transient(source: impl Into<String>) -> Self {
        Self::Transient { source: source.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal { message: message.into() }
    }

    /// True for errors the `retry` helper should keep retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type CrashResult<T> = Result<T, CrashCoreError>;
