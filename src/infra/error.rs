//! Error types for the ledger infrastructure

use std::time::Duration;

use thiserror::Error;

/// Errors raised by ledger storage
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Backing store unavailable or query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No record with this id
    #[error("scan record not found: {0}")]
    RecordNotFound(i64),

    /// Stored status outside {0, 1}
    #[error("invalid status value: {0}")]
    InvalidStatus(i64),

    /// Unsupported or malformed configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure to deliver a status notification.
///
/// Always recovered by the caller; the stored record stays authoritative.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The broker client rejected the publish
    #[error("publish failed: {0}")]
    Publish(String),

    /// The publish did not complete in time
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    /// Recent publishes failed; the broker is not being tried
    #[error("notification circuit is open")]
    CircuitOpen,
}
