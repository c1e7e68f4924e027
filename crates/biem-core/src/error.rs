//! Error types
//!
//! One crate-wide error enum, classified into the four kinds the public
//! API distinguishes: transient external failures (retryable), permanent
//! external failures (backend unavailable), validation failures (rejected
//! before side effects), and not-found lookups. Knowledge conflicts and a
//! full working set are *not* errors; they are ordinary signals handled by
//! the confirmation flow and the eviction policy respectively.

use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR KINDS
// ============================================================================

/// Classification of an error for boundary callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// External transient failure (timeout, I/O); retried within a bounded
    /// budget before surfacing
    Transient,
    /// External permanent failure (schema mismatch, auth); the backend is
    /// marked unavailable
    Permanent,
    /// Input rejected before any side effect
    Validation,
    /// Lookup miss on an id the caller supplied
    NotFound,
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum BiemError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Vector index error
    #[error("vector index error: {0}")]
    Index(String),
    /// Embedding provider error
    #[error("embedding provider error: {0}")]
    Embedding(String),
    /// Language model provider error
    #[error("language model error: {0}")]
    Completion(String),
    /// A provider or backend call exceeded its deadline
    #[error("deadline exceeded after {0} ms")]
    Timeout(u64),
    /// Backend marked unavailable after a permanent failure
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Input rejected before any side effect
    #[error("validation failed [{code}]: {message}")]
    Validation {
        /// Stable, language-neutral code
        code: &'static str,
        /// Human-readable cause
        message: String,
    },
    /// Id not found
    #[error("not found: {0}")]
    NotFound(String),
    /// Startup / initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, BiemError>;

impl BiemError {
    /// Build a validation error with a stable code
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        BiemError::Validation {
            code,
            message: message.into(),
        }
    }

    /// Classify this error for boundary callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            BiemError::Database(_)
            | BiemError::Io(_)
            | BiemError::Index(_)
            | BiemError::Embedding(_)
            | BiemError::Completion(_)
            | BiemError::Timeout(_) => ErrorKind::Transient,
            BiemError::Unavailable(_) | BiemError::Init(_) => ErrorKind::Permanent,
            BiemError::Validation { .. } => ErrorKind::Validation,
            BiemError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Stable message code for logs and API payloads
    pub fn code(&self) -> &'static str {
        match self {
            BiemError::Database(_) => "E_DB",
            BiemError::Io(_) => "E_IO",
            BiemError::Index(_) => "E_INDEX",
            BiemError::Embedding(_) => "E_EMBED",
            BiemError::Completion(_) => "E_LLM",
            BiemError::Timeout(_) => "E_TIMEOUT",
            BiemError::Unavailable(_) => "E_UNAVAILABLE",
            BiemError::Validation { code, .. } => code,
            BiemError::NotFound(_) => "E_NOT_FOUND",
            BiemError::Init(_) => "E_INIT",
        }
    }

    /// Whether a bounded retry may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// ============================================================================
// TESTS
// ============================================================================
