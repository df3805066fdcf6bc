//! HTTP intake for the delivery pipeline.
//!
//! `POST /send` authorizes the caller by API key, validates the requested
//! service and recipient, and persists exactly one `queued`
//! [`EmailJob`](herald_store::EmailJob). Nothing is transmitted inline; the
//! 202 response hands back a job id the caller can poll at `GET /jobs/{id}`
//! while the dispatch workers do the sending.

pub mod config;
pub mod error;
pub mod server;

pub use config::IntakeConfig;
pub use error::{IntakeError, Result};
pub use server::{API_KEY_HEADER, IntakeServer, JobStatusResponse, SendRequest, SendResponse};
