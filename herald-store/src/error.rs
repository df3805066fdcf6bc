//! Error types for the herald-store crate.

use std::io;

use herald_common::id::{DeliveryId, JobId};
use thiserror::Error;

/// Top-level store error type.
///
/// Claim contention is not an error: claim operations return `Ok(None)` when
/// another worker won the row.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization of a stored record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Webhook delivery not found.
    #[error("Webhook delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),

    /// Store directory validation failed.
    #[error("Store validation error: {0}")]
    Validation(String),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// Convenience conversion for lock poisoning
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
