//! Intake HTTP server

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use herald_common::{Signal, address::parse_mailbox, id::JobId, incoming};
use herald_registry::Registry;
use herald_store::{EmailJob, ErrorCategory, JobStatus, Store};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{IntakeConfig, IntakeError, error::Result};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for request handlers.
#[derive(Debug, Clone)]
struct IntakeState {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    default_max_retries: u32,
}

/// Body of `POST /send`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendRequest {
    pub service_name: String,
    pub to_email: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// 202 body answering `POST /send`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

/// Body answering `GET /jobs/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Intake HTTP server
///
/// Accepts send requests, answers job status polls, and serves
/// `/health/live` and `/health/ready` for Kubernetes probes.
pub struct IntakeServer {
    listener: TcpListener,
    router: Router,
}

impl std::fmt::Debug for IntakeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeServer")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl IntakeServer {
    /// Create a new intake server
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(
        config: &IntakeConfig,
        store: Arc<dyn Store>,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| IntakeError::Bind {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Intake server bound successfully"
        );

        let state = IntakeState {
            store,
            registry,
            default_max_retries: config.default_max_retries,
        };

        let router = Router::new()
            .route("/send", post(send))
            .route("/jobs/{id}", get(job_status))
            .route("/health/live", get(liveness))
            .route("/health/ready", get(readiness))
            .with_state(state)
            // Every response, probes included, within a second
            .layer(TimeoutLayer::new(Duration::from_secs(1)));

        Ok(Self { listener, router })
    }

    /// The address the server actually bound, useful when the configured
    /// port was 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot report its address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the intake server until shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<()> {
        tracing::info!("Intake server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Intake server received shutdown signal");
            })
            .await
            .map_err(|e| IntakeError::Server(e.to_string()))?;

        tracing::info!("Intake server stopped");
        Ok(())
    }
}

fn api_key(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| IntakeError::Authorization("Missing API key".to_owned()))
}

/// `POST /send` handler
///
/// Validation order: API key, then service, then recipient. A failure at any
/// step creates no job.
async fn send(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Response> {
    let application = state.registry.authorize(api_key(&headers)?)?;

    state
        .registry
        .validate_service(application.tenant_id, &request.service_name)?;

    let mailbox = parse_mailbox(&request.to_email)?;

    let job = EmailJob::new(
        application.tenant_id,
        application.id,
        request.service_name,
        mailbox.to_string(),
        request.variables,
        state.default_max_retries,
    );

    state.store.insert_job(&job).await?;

    incoming!(
        level = INFO,
        "Accepted job {} for {} through service {}",
        job.id,
        job.to_email,
        job.service_name
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SendResponse {
            job_id: job.id,
            status: job.status,
            message: "Email queued for delivery".to_owned(),
        }),
    )
        .into_response())
}

/// `GET /jobs/{id}` handler
///
/// The polling surface for a submitted job. Jobs belonging to another
/// application do not exist as far as the caller can tell.
async fn job_status(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Path(id): Path<JobId>,
) -> Result<Response> {
    let application = state.registry.authorize(api_key(&headers)?)?;

    let job = state
        .store
        .job(id)
        .await?
        .filter(|job| job.application_id == application.id)
        .ok_or_else(|| IntakeError::NotFound(format!("No job {id}")))?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        error_category: job.error_category,
        error_message: job.error_message,
        retry_count: job.retry_count,
        max_retries: job.max_retries,
        created_at: job.created_at,
        sent_at: job.sent_at,
        next_retry_at: job.next_retry_at,
    })
    .into_response())
}

/// Liveness probe handler
///
/// Returns 200 OK if the process can answer requests at all. Kubernetes will
/// restart the container if this probe fails.
async fn liveness() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Readiness probe handler
///
/// Ready means the store answers: a store that cannot be read cannot accept
/// jobs, so the pod should fall out of the service endpoints.
async fn readiness(State(state): State<IntakeState>) -> Response {
    match state.store.due_jobs(Utc::now(), 1).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(error) => {
            tracing::warn!("Readiness probe failed: {error}");
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
        }
    }
}
