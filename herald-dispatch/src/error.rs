//! Typed error handling for dispatch operations.
//!
//! This module provides structured error types that distinguish between:
//! - Permanent failures (rejected recipients, bad configuration) - don't retry
//! - Temporary failures (connection problems, busy servers) - retry with backoff
//! - System errors - our own store or setup, never the job's fault

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Top-level dispatch error type.
///
/// The variant decides the claimed job's fate: `Permanent` dead-letters it,
/// `Temporary` reschedules it while retries remain, and `System` releases the
/// claim without consuming a retry.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Permanent failure that should not be retried.
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried with backoff.
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (store, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Permanent errors that should not be retried.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Recipient address is invalid or was rejected by the server.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Message was rejected by the server (5xx response).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// SMTP authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service's SMTP or template linkage is missing or unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Temporary errors that should be retried with exponential backoff.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to establish a connection to the mail server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The attempt exceeded its timeout.
    #[error("Connection timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code (4xx response).
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS negotiation failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The pipeline store failed.
    #[error("Store error: {0}")]
    Store(#[from] herald_store::StoreError),

    /// Recording the owed webhook failed.
    #[error("Webhook enqueue error: {0}")]
    WebhookEnqueue(String),

    /// Dispatch processor not initialized.
    #[error("Dispatch processor not initialised: {0}")]
    NotInitialised(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

impl From<herald_store::StoreError> for DispatchError {
    fn from(error: herald_store::StoreError) -> Self {
        Self::System(SystemError::Store(error))
    }
}

/// Registry failures are configuration problems: missing or disabled links
/// that no amount of retrying will repair.
impl From<herald_registry::RegistryError> for DispatchError {
    fn from(error: herald_registry::RegistryError) -> Self {
        Self::Permanent(PermanentError::Configuration(error.to_string()))
    }
}

impl From<herald_webhook::WebhookError> for DispatchError {
    fn from(error: herald_webhook::WebhookError) -> Self {
        Self::System(SystemError::WebhookEnqueue(error.to_string()))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DispatchError {
    fn from(error: std::sync::PoisonError<T>) -> Self {
        Self::System(SystemError::Internal(error.to_string()))
    }
}
