//! Webhook delivery orchestration.

pub mod deliver;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use herald_common::{Signal, backoff::RetryPolicy, internal};
use herald_registry::Registry;
use herald_store::Store;
use serde::Deserialize;

use crate::error::{Result, WebhookError};

use deliver::DeliverContext;

const fn default_poll_interval() -> u64 {
    5
}

const fn default_sweep_interval() -> u64 {
    30
}

const fn default_max_concurrent() -> usize {
    8
}

const fn default_request_timeout() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_retry_delay() -> u64 {
    30
}

const fn default_max_retry_delay() -> u64 {
    300 // 5 minutes
}

const fn default_retry_jitter_factor() -> f64 {
    0.2 // ±20%
}

const fn default_stale_claim_secs() -> u64 {
    120
}

const fn default_batch_size() -> usize {
    50
}

/// Processor for delivering webhook callbacks.
///
/// Runs continuously, polling the store for due deliveries and POSTing them
/// in parallel, entirely decoupled from email dispatch.
#[derive(Debug, Deserialize)]
pub struct WebhookProcessor {
    /// How often to poll the store for due deliveries (in seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How often to sweep for deliveries stuck in `delivering` (in seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum number of deliveries POSTed in parallel
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deliveries: usize,

    /// Per-request timeout for callback endpoints (in seconds)
    ///
    /// A slow endpoint counts as a temporary failure once this elapses.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries granted to each delivery after its first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (in seconds)
    ///
    /// First retry will occur after this delay. Subsequent retries will
    /// double it (with jitter) up to `max_retry_delay_secs`.
    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_secs: u64,

    /// Maximum delay between retry attempts (in seconds)
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,

    /// Jitter factor for retry delays (0.0 to 1.0)
    ///
    /// Adds randomness to retry delays to prevent thundering herd.
    #[serde(default = "default_retry_jitter_factor")]
    pub retry_jitter_factor: f64,

    /// Age (in seconds) after which a `delivering` claim is presumed dead
    /// and swept back to `pending`
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,

    /// Maximum due deliveries fetched per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// The pipeline store (initialized in `init()`)
    #[serde(skip)]
    store: Option<Arc<dyn Store>>,

    /// The tenant directory, for signing secrets (initialized in `init()`)
    #[serde(skip)]
    registry: Option<Arc<Registry>>,

    /// Shared HTTP client (initialized in `init()`)
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for WebhookProcessor {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent_deliveries: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            base_retry_delay_secs: default_base_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            retry_jitter_factor: default_retry_jitter_factor(),
            stale_claim_secs: default_stale_claim_secs(),
            batch_size: default_batch_size(),
            store: None,
            registry: None,
            client: None,
        }
    }
}

impl WebhookProcessor {
    /// Initialize the webhook processor
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn init(&mut self, store: Arc<dyn Store>, registry: Arc<Registry>) -> Result<()> {
        internal!("Initialising Webhook Processor ...");

        let client = reqwest::Client::builder()
            .user_agent(concat!("herald-webhook/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?;

        self.store = Some(store);
        self.registry = Some(registry);
        self.client = Some(client);

        internal!(
            "Webhook processor initialised with timeout={}s, max_concurrent={}, max_retries={}",
            self.request_timeout_secs,
            self.max_concurrent_deliveries,
            self.max_retries
        );

        Ok(())
    }

    /// Run the webhook processor
    ///
    /// This method runs continuously until a shutdown signal is received,
    /// polling for due deliveries and sweeping stale claims at configurable
    /// intervals.
    ///
    /// ## Graceful Shutdown
    ///
    /// When a shutdown signal is received:
    /// 1. Stop accepting new work (poll/sweep ticks)
    /// 2. Wait for the in-flight batch to complete (with 30s timeout)
    /// 3. Exit cleanly
    ///
    /// Deliveries still in flight past the timeout stay `delivering` and are
    /// swept back to `pending` after the next restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<()> {
        internal!("Webhook processor starting");

        if self.store.is_none() || self.registry.is_none() || self.client.is_none() {
            return Err(WebhookError::NotInitialised);
        }

        let mut poll_timer = tokio::time::interval(Duration::from_secs(self.poll_interval_secs));
        let mut sweep_timer = tokio::time::interval(Duration::from_secs(self.sweep_interval_secs));

        // Skip the first tick to avoid immediate execution
        poll_timer.tick().await;
        sweep_timer.tick().await;

        // Track if we're currently processing a batch
        let processing = Arc::new(AtomicBool::new(false));
        let processing_clone = processing.clone();

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    processing.store(true, Ordering::SeqCst);

                    match self.process_once().await {
                        Ok(count) if count > 0 => {
                            herald_common::tracing::info!("Processed {count} webhook deliveries");
                        }
                        Ok(_) => {
                            herald_common::tracing::debug!("No due webhook deliveries");
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Error processing webhook deliveries: {e}");
                        }
                    }

                    processing.store(false, Ordering::SeqCst);
                }
                _ = sweep_timer.tick() => {
                    match self.sweep_once().await {
                        Ok(count) if count > 0 => {
                            herald_common::tracing::warn!("Swept {count} stale webhook claims back to pending");
                        }
                        Ok(_) => {
                            herald_common::tracing::debug!("No stale webhook claims");
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Error sweeping stale webhook claims: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Webhook processor received shutdown signal");

                            let shutdown_timeout = Duration::from_secs(30);
                            let start = std::time::Instant::now();

                            while processing_clone.load(Ordering::SeqCst) {
                                if start.elapsed() >= shutdown_timeout {
                                    herald_common::tracing::warn!(
                                        "Shutdown timeout exceeded, in-flight deliveries will be swept after restart"
                                    );
                                    break;
                                }

                                herald_common::tracing::debug!(
                                    "Waiting for in-flight deliveries to complete ({:.1}s elapsed)...",
                                    start.elapsed().as_secs_f64()
                                );
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }

                            if !processing_clone.load(Ordering::SeqCst) {
                                internal!("All in-flight webhook deliveries completed");
                            }

                            internal!("Webhook processor shutdown complete");
                            break;
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Webhook processor shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Fetch one batch of due deliveries and POST them in parallel.
    ///
    /// Returns the number of deliveries attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized or the store
    /// cannot list due deliveries
    pub async fn process_once(&self) -> Result<usize> {
        let context = self.context()?;

        let due = context
            .store
            .due_deliveries(Utc::now(), self.batch_size)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let count = due.len();
        deliver::process_batch(context, due, self.max_concurrent_deliveries).await;

        Ok(count)
    }

    /// Sweep deliveries stuck in `delivering` back to `pending`.
    ///
    /// Returns the number of claims reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized or the store
    /// cannot be updated
    pub async fn sweep_once(&self) -> Result<usize> {
        let store = self.store.as_ref().ok_or(WebhookError::NotInitialised)?;

        let reclaimed = store.reclaim_stale_deliveries(self.stale_cutoff()).await?;
        for id in &reclaimed {
            internal!(
                level = WARN,
                "Reclaimed webhook delivery {id} from a stale claim"
            );
        }

        Ok(reclaimed.len())
    }

    fn context(&self) -> Result<DeliverContext> {
        match (&self.store, &self.registry, &self.client) {
            (Some(store), Some(registry), Some(client)) => Ok(DeliverContext {
                store: store.clone(),
                registry: registry.clone(),
                client: client.clone(),
                policy: RetryPolicy {
                    base_delay_secs: self.base_retry_delay_secs,
                    max_delay_secs: self.max_retry_delay_secs,
                    jitter_factor: self.retry_jitter_factor,
                },
            }),
            _ => Err(WebhookError::NotInitialised),
        }
    }

    fn stale_cutoff(&self) -> DateTime<Utc> {
        let stale = TimeDelta::seconds(i64::try_from(self.stale_claim_secs).unwrap_or(i64::MAX));

        Utc::now()
            .checked_sub_signed(stale)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
