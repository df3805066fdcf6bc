//! Intake error types and their HTTP renderings.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use herald_common::address::AddressError;
use herald_registry::RegistryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IntakeError>;

/// Errors that can occur while serving intake requests
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Failed to bind to the specified address
    #[error("Failed to bind intake server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// Intake server encountered a runtime error
    #[error("Intake server error: {0}")]
    Server(String),

    /// The presented API key is missing, unknown or disabled
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The requested resource does not exist for this caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request body failed validation
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The caller's directory entry is present but unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The store refused the operation
    #[error(transparent)]
    Store(#[from] herald_store::StoreError),
}

impl From<RegistryError> for IntakeError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::UnknownApiKey | RegistryError::ApplicationDisabled(_) => {
                Self::Authorization(error.to_string())
            }
            RegistryError::UnknownService(_) => Self::NotFound(error.to_string()),
            _ => Self::Configuration(error.to_string()),
        }
    }
}

impl From<AddressError> for IntakeError {
    fn from(error: AddressError) -> Self {
        Self::Validation(format!("Invalid recipient address: {error}"))
    }
}

/// JSON body every intake error renders as.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::Authorization(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Configuration(_) => (StatusCode::BAD_REQUEST, "configuration_error"),
            Self::Store(_) | Self::Bind { .. } | Self::Server(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        // Server-side failures are logged in full and answered vaguely.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Intake request failed: {self}");
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: error.to_owned(),
                message,
            }),
        )
            .into_response()
    }
}
