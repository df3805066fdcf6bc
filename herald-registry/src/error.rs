//! Error types for the herald-registry crate.
//!
//! Every resolution failure here is a configuration problem, which the
//! dispatcher treats as a permanent error for the calling job: retrying
//! cannot make a missing template appear.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// No application matches the presented API key.
    #[error("Unknown API key")]
    UnknownApiKey,

    /// The application exists but has been deactivated.
    #[error("Application is disabled: {0}")]
    ApplicationDisabled(String),

    /// No service with this name exists for the tenant.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// The service exists but has been deactivated.
    #[error("Service is disabled: {0}")]
    ServiceDisabled(String),

    /// The service references an SMTP configuration that does not exist.
    #[error("Service {0} has no SMTP configuration")]
    MissingSmtp(String),

    /// The service references a template that does not exist.
    #[error("Service {0} has no template")]
    MissingTemplate(String),

    /// The master key is not valid base64 or has the wrong length.
    #[error("Invalid master key: {0}")]
    MasterKey(String),

    /// A sealed secret could not be opened with the master key.
    #[error("Secret could not be opened: {0}")]
    Secret(String),
}

/// Specialized `Result` type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
