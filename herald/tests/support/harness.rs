//! End-to-end test harness for the herald pipeline
//!
//! This module provides a self-contained harness that starts a complete
//! pipeline instance and a mock callback endpoint for testing the full flow.
//!
//! # Example
//!
//! ```no_run
//! use support::harness::PipelineHarness;
//! use std::time::Duration;
//!
//! #[tokio::test]
//! async fn test_delivery() {
//!     let harness = PipelineHarness::builder().build().await.unwrap();
//!
//!     // Submit a send request over HTTP
//!     let response = harness.send("welcome", "ada@example.com", &[]).await.unwrap();
//!
//!     // Wait for the dispatch loop to pick it up
//!     harness
//!         .wait_for_job(job_id, JobStatus::Sent, Duration::from_secs(5))
//!         .await
//!         .unwrap();
//!
//!     harness.shutdown().await;
//! }
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use herald_common::{
    Signal,
    id::{ApplicationId, JobId, TenantId},
};
use herald_dispatch::{DispatchProcessor, MockMailer};
use herald_intake::{API_KEY_HEADER, IntakeConfig, IntakeServer, JobStatusResponse};
use herald_registry::{
    Application, EmailService, MasterKey, Registry, SmtpConfig, Template, WebhookSettings,
    hash_api_key,
};
use herald_store::{
    DeliveryStatus, FileStore, JobStatus, MemoryStore, Store, WebhookDelivery, WebhookEvent,
    WebhookStore,
};
use herald_webhook::{WebhookEnqueuer, WebhookProcessor};
use tokio::{sync::broadcast, task::JoinHandle, time::timeout};
use wiremock::MockServer;

/// API key the harness registry accepts.
pub const API_KEY: &str = "key_live_e2e";

/// Signing secret registered for the harness application's webhooks.
pub const WEBHOOK_SECRET: &str = "whsec_e2e";

/// End-to-end test harness for the herald pipeline
///
/// This harness starts a complete pipeline instance with:
/// - Intake HTTP server (listening on a random port)
/// - Memory-backed store shared by every stage
/// - Dispatch processor (transmitting through a scriptable mock mailer)
/// - Webhook processor (POSTing to a wiremock endpoint)
///
/// All components run in the same process, wired through the same broadcast
/// shutdown channel the production controller uses.
pub struct PipelineHarness {
    /// Base URL of the intake server
    base_url: String,

    /// HTTP client for talking to the intake server
    client: reqwest::Client,

    /// Scriptable mailer standing in for the SMTP network
    mailer: Arc<MockMailer>,

    /// The store every stage shares
    store: Arc<dyn Store>,

    /// Keeps a file-backed store's directory alive for the harness lifetime
    _tempdir: Option<tempfile::TempDir>,

    /// Mock endpoint receiving webhook callbacks
    hooks: MockServer,

    /// Handle for the intake server task
    intake_handle: JoinHandle<anyhow::Result<()>>,

    /// Handle for the dispatch processor task
    dispatch_handle: JoinHandle<anyhow::Result<()>>,

    /// Handle for the webhook processor task
    webhook_handle: JoinHandle<anyhow::Result<()>>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<Signal>,
}

impl PipelineHarness {
    /// Create a new builder for configuring the test harness
    #[must_use]
    pub fn builder() -> PipelineHarnessBuilder {
        PipelineHarnessBuilder::new()
    }

    /// The scriptable mailer, for scripting failures and inspecting sends
    #[must_use]
    pub fn mailer(&self) -> &MockMailer {
        &self.mailer
    }

    /// The shared store, for direct record inspection
    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// The mock callback endpoint, for mounting responders
    #[must_use]
    pub fn hooks(&self) -> &MockServer {
        &self.hooks
    }

    /// `POST /send` with an arbitrary key and body
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent at all.
    pub async fn post_send(
        &self,
        api_key: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/send", self.base_url))
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await?;

        Ok(response)
    }

    /// `POST /send` with the harness key and a well-formed body
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent at all.
    pub async fn send(
        &self,
        service: &str,
        to: &str,
        variables: &[(&str, &str)],
    ) -> anyhow::Result<reqwest::Response> {
        let variables: BTreeMap<_, _> = variables
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();

        self.post_send(
            API_KEY,
            &serde_json::json!({
                "service_name": service,
                "to_email": to,
                "variables": variables,
            }),
        )
        .await
    }

    /// `GET /jobs/{id}` with the harness key
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or answers anything but 200.
    pub async fn job_status(&self, id: JobId) -> anyhow::Result<JobStatusResponse> {
        let response = self
            .client
            .get(format!("{}/jobs/{id}", self.base_url))
            .header(API_KEY_HEADER, API_KEY)
            .send()
            .await?;

        anyhow::ensure!(
            response.status().as_u16() == 200,
            "Job status for {id} answered {}",
            response.status()
        );

        Ok(response.json().await?)
    }

    /// Poll `GET /jobs/{id}` until the job reaches `status`
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout expires first.
    pub async fn wait_for_job(
        &self,
        id: JobId,
        status: JobStatus,
        timeout_duration: Duration,
    ) -> anyhow::Result<JobStatusResponse> {
        let start = tokio::time::Instant::now();

        loop {
            let job = self.job_status(id).await?;
            if job.status == status {
                return Ok(job);
            }

            if start.elapsed() > timeout_duration {
                anyhow::bail!(
                    "Timeout waiting for job {id} to reach {status}, last seen {}",
                    job.status
                );
            }

            // Poll every 100ms
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Wait until the callback endpoint has received `count` requests
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout expires first.
    pub async fn wait_for_callbacks(
        &self,
        count: usize,
        timeout_duration: Duration,
    ) -> anyhow::Result<Vec<wiremock::Request>> {
        let start = tokio::time::Instant::now();

        loop {
            let received = self.hooks.received_requests().await.unwrap_or_default();
            if received.len() >= count {
                return Ok(received);
            }

            if start.elapsed() > timeout_duration {
                anyhow::bail!(
                    "Timeout waiting for callbacks. Endpoint received {} of {count}",
                    received.len()
                );
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// All requests the callback endpoint has received so far
    pub async fn received_callbacks(&self) -> Vec<wiremock::Request> {
        self.hooks.received_requests().await.unwrap_or_default()
    }

    /// Poll the store until the delivery for `(job_id, event)` reaches
    /// `status`
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout expires first.
    pub async fn wait_for_delivery(
        &self,
        job_id: JobId,
        event: WebhookEvent,
        status: DeliveryStatus,
        timeout_duration: Duration,
    ) -> anyhow::Result<WebhookDelivery> {
        let start = tokio::time::Instant::now();

        loop {
            if let Some(id) = self.store.delivery_for_event(job_id, event).await? {
                if let Some(delivery) = self.store.delivery(id).await? {
                    if delivery.status == status {
                        return Ok(delivery);
                    }
                }
            }

            if start.elapsed() > timeout_duration {
                anyhow::bail!(
                    "Timeout waiting for the {event} delivery of job {job_id} to reach {status}"
                );
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Shutdown the test harness and all components
    ///
    /// Sends the shutdown signal and waits for every task to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(Signal::Shutdown);

        let _ = timeout(Duration::from_secs(5), async {
            let _ = self.intake_handle.await;
            let _ = self.dispatch_handle.await;
            let _ = self.webhook_handle.await;
        })
        .await;
    }
}

/// Builder for configuring a pipeline test harness
pub struct PipelineHarnessBuilder {
    /// Whether the registered application has webhooks switched on
    webhooks_enabled: bool,

    /// Whether to back the pipeline with a file store instead of memory
    file_store: bool,
}

impl PipelineHarnessBuilder {
    const fn new() -> Self {
        Self {
            webhooks_enabled: true,
            file_store: false,
        }
    }

    /// Register the application with webhooks switched off
    #[must_use]
    pub const fn with_webhooks_disabled(mut self) -> Self {
        self.webhooks_enabled = false;
        self
    }

    /// Back the pipeline with a file store in a temporary directory
    #[must_use]
    pub const fn with_file_store(mut self) -> Self {
        self.file_store = true;
        self
    }

    /// Build and start the pipeline test harness
    ///
    /// This will:
    /// 1. Start a wiremock endpoint to receive webhook callbacks
    /// 2. Assemble a one-application directory pointing its webhooks there
    /// 3. Start an intake server on a random port
    /// 4. Start the dispatch and webhook serve loops on 1s polls with zero
    ///    retry backoff, so retried work is due again on the next poll
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to start.
    pub async fn build(self) -> anyhow::Result<PipelineHarness> {
        // 1. Start the callback endpoint
        let hooks = MockServer::start().await;

        // 2. Assemble the directory
        let (master_key, _) = MasterKey::generate();
        let sealed = master_key.seal("hunter2")?;
        let tenant_id = TenantId::generate();

        let webhook = if self.webhooks_enabled {
            WebhookSettings {
                enabled: true,
                url: Some(format!("{}/hooks", hooks.uri())),
                secret: Some(WEBHOOK_SECRET.to_owned()),
                events: vec![WebhookEvent::EmailSent, WebhookEvent::EmailFailed],
            }
        } else {
            WebhookSettings::default()
        };

        let registry = Arc::new(Registry::new(
            master_key,
            vec![Application {
                id: ApplicationId::generate(),
                tenant_id,
                name: "storefront".to_owned(),
                api_key_hash: hash_api_key(API_KEY),
                active: true,
                webhook,
            }],
            vec![EmailService {
                name: "welcome".to_owned(),
                tenant_id,
                from_email: "no-reply@storefront.example".to_owned(),
                template: "welcome".to_owned(),
                smtp: "primary".to_owned(),
                active: true,
            }],
            vec![Template {
                name: "welcome".to_owned(),
                subject: "Welcome {{name}}!".to_owned(),
                body: "<p>Hello {{name}}.</p>".to_owned(),
            }],
            vec![SmtpConfig {
                name: "primary".to_owned(),
                host: "smtp.storefront.example".to_owned(),
                port: 587,
                username: "mailer".to_owned(),
                password: sealed,
                tls: None,
            }],
        ));

        let (store, tempdir): (Arc<dyn Store>, Option<tempfile::TempDir>) = if self.file_store {
            let dir = tempfile::tempdir()?;
            let file_store = FileStore::new(dir.path().to_path_buf())?;
            file_store.init()?;
            (Arc::new(file_store), Some(dir))
        } else {
            (Arc::new(MemoryStore::new()), None)
        };

        let mailer = Arc::new(MockMailer::new());
        let (shutdown_tx, _) = broadcast::channel(16);

        // 3. Start the intake server on a random port
        let config = IntakeConfig {
            listen_address: "127.0.0.1:0".to_owned(),
            ..IntakeConfig::default()
        };
        let server = IntakeServer::new(&config, store.clone(), registry.clone()).await?;
        let address = server.local_addr()?;

        let shutdown_rx_intake = shutdown_tx.subscribe();
        let intake_handle = tokio::spawn(async move {
            server
                .serve(shutdown_rx_intake)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        });

        // 4. Start the dispatch processor with fast polls and zero backoff
        let mut dispatch: DispatchProcessor = serde_json::from_value(serde_json::json!({
            "poll_interval_secs": 1,
            "base_retry_delay_secs": 0,
            "max_retry_delay_secs": 0,
            "retry_jitter_factor": 0.0,
        }))?;
        dispatch.init(
            store.clone(),
            registry.clone(),
            mailer.clone(),
            WebhookEnqueuer::new(store.clone(), 3),
        );

        let dispatch = Arc::new(dispatch);
        let shutdown_rx_dispatch = shutdown_tx.subscribe();
        let dispatch_handle = tokio::spawn({
            let dispatch = dispatch.clone();
            async move {
                dispatch
                    .serve(shutdown_rx_dispatch)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
            }
        });

        // 5. Start the webhook processor the same way
        let mut webhook: WebhookProcessor = serde_json::from_value(serde_json::json!({
            "poll_interval_secs": 1,
            "base_retry_delay_secs": 0,
            "max_retry_delay_secs": 0,
            "retry_jitter_factor": 0.0,
            "request_timeout_secs": 1,
        }))?;
        webhook.init(store.clone(), registry)?;

        let webhook = Arc::new(webhook);
        let shutdown_rx_webhook = shutdown_tx.subscribe();
        let webhook_handle = tokio::spawn({
            let webhook = webhook.clone();
            async move {
                webhook
                    .serve(shutdown_rx_webhook)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))
            }
        });

        // Give everything a moment to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(PipelineHarness {
            base_url: format!("http://{address}"),
            client: reqwest::Client::new(),
            mailer,
            store,
            _tempdir: tempdir,
            hooks,
            intake_handle,
            dispatch_handle,
            webhook_handle,
            shutdown_tx,
        })
    }
}
