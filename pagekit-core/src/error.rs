//! Error types for pagekit operations

use thiserror::Error;

/// Page store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: &'static str },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Error produced by a page source while loading a page.
///
/// Page sources own their retry policy. Whatever reaches the engine as a
/// `LoadError` terminates the load for that key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for LoadError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for LoadError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Paginator orchestration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaginatorError {
    #[error("No tokio runtime available to spawn page loads")]
    NoRuntime,

    #[error("Pageable has been closed")]
    Closed,

    #[error("Loading page {key} failed: {reason}")]
    LoadFailed { key: String, reason: String },
}

/// Master error type for all pagekit errors.
#[derive(Debug, Clone, Error)]
pub enum PagekitError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Paginator error: {0}")]
    Paginator(#[from] PaginatorError),
}

/// Result type alias for pagekit operations.
pub type PagekitResult<T> = Result<T, PagekitError>;

// =============================================================================
// TESTS
// =============================================================================
