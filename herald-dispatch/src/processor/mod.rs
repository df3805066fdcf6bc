//! Dispatch processor orchestration.

pub mod process;

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
use herald_webhook::WebhookEnqueuer;
use serde::Deserialize;

use crate::{
    error::{Result, SystemError},
    mailer::Mailer,
};

use process::DispatchContext;

const fn default_poll_interval() -> u64 {
    5
}

const fn default_sweep_interval() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    num_cpus::get()
}

const fn default_attempt_timeout() -> u64 {
    30
}

const fn default_base_retry_delay() -> u64 {
    60 // 1 minute
}

const fn default_max_retry_delay() -> u64 {
    600 // 10 minutes
}

const fn default_retry_jitter_factor() -> f64 {
    0.2 // ±20%
}

const fn default_stale_claim_secs() -> u64 {
    // Four attempt timeouts: a live worker always reports back before its
    // claim can look stale to the sweeper.
    120
}

const fn default_batch_size() -> usize {
    50
}

/// Processor for dispatching queued email jobs.
///
/// Runs continuously, claiming due jobs from the store and transmitting them
/// in parallel through per-tenant SMTP credentials.
#[derive(Debug, Deserialize)]
pub struct DispatchProcessor {
    /// How often to poll the store for due jobs (in seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How often to sweep for jobs stuck in `processing` (in seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum number of jobs dispatched in parallel
    ///
    /// Defaults to the number of CPUs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,

    /// Per-attempt SMTP timeout (in seconds)
    ///
    /// Must stay well under `stale_claim_secs`, so a hung transmission
    /// returns to its worker long before the sweeper could presume the
    /// worker dead.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

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

    /// Age (in seconds) after which a `processing` claim is presumed dead
    /// and swept back to `queued`
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,

    /// Maximum due jobs fetched per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// The pipeline store (initialized in `init()`)
    #[serde(skip)]
    store: Option<Arc<dyn Store>>,

    /// The tenant directory (initialized in `init()`)
    #[serde(skip)]
    registry: Option<Arc<Registry>>,

    /// The transmission seam (initialized in `init()`)
    #[serde(skip)]
    mailer: Option<Arc<dyn Mailer>>,

    /// Records webhooks owed for terminal outcomes (initialized in `init()`)
    #[serde(skip)]
    enqueuer: Option<WebhookEnqueuer>,
}

impl Default for DispatchProcessor {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent_dispatches: default_max_concurrent(),
            attempt_timeout_secs: default_attempt_timeout(),
            base_retry_delay_secs: default_base_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            retry_jitter_factor: default_retry_jitter_factor(),
            stale_claim_secs: default_stale_claim_secs(),
            batch_size: default_batch_size(),
            store: None,
            registry: None,
            mailer: None,
            enqueuer: None,
        }
    }
}

impl DispatchProcessor {
    /// Initialize the dispatch processor
    pub fn init(
        &mut self,
        store: Arc<dyn Store>,
        registry: Arc<Registry>,
        mailer: Arc<dyn Mailer>,
        enqueuer: WebhookEnqueuer,
    ) {
        internal!("Initialising Dispatch Processor ...");

        self.store = Some(store);
        self.registry = Some(registry);
        self.mailer = Some(mailer);
        self.enqueuer = Some(enqueuer);

        internal!(
            "Dispatch processor initialised with attempt_timeout={}s, max_concurrent={}, backoff={}s..{}s",
            self.attempt_timeout_secs,
            self.max_concurrent_dispatches,
            self.base_retry_delay_secs,
            self.max_retry_delay_secs
        );
    }

    /// Run the dispatch processor
    ///
    /// This method runs continuously until a shutdown signal is received,
    /// claiming due jobs and sweeping stale claims at configurable
    /// intervals.
    ///
    /// ## Graceful Shutdown
    ///
    /// When a shutdown signal is received:
    /// 1. Stop accepting new work (poll/sweep ticks)
    /// 2. Wait for the in-flight batch to complete (with 30s timeout)
    /// 3. Exit cleanly
    ///
    /// Jobs still in flight past the timeout stay `processing` and are swept
    /// back to `queued` after the next restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<()> {
        internal!("Dispatch processor starting");

        // Fail fast rather than midway through the first poll.
        self.context()?;

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
                            herald_common::tracing::info!("Dispatched {count} email jobs");
                        }
                        Ok(_) => {
                            herald_common::tracing::debug!("No due email jobs");
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Error dispatching email jobs: {e}");
                        }
                    }

                    processing.store(false, Ordering::SeqCst);
                }
                _ = sweep_timer.tick() => {
                    match self.sweep_once().await {
                        Ok(count) if count > 0 => {
                            herald_common::tracing::warn!("Swept {count} stale job claims back to queued");
                        }
                        Ok(_) => {
                            herald_common::tracing::debug!("No stale job claims");
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Error sweeping stale job claims: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatch processor received shutdown signal");

                            let shutdown_timeout = Duration::from_secs(30);
                            let start = std::time::Instant::now();

                            while processing_clone.load(Ordering::SeqCst) {
                                if start.elapsed() >= shutdown_timeout {
                                    herald_common::tracing::warn!(
                                        "Shutdown timeout exceeded, in-flight jobs will be swept after restart"
                                    );
                                    break;
                                }

                                herald_common::tracing::debug!(
                                    "Waiting for in-flight jobs to complete ({:.1}s elapsed)...",
                                    start.elapsed().as_secs_f64()
                                );
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }

                            if !processing_clone.load(Ordering::SeqCst) {
                                internal!("All in-flight jobs completed");
                            }

                            internal!("Dispatch processor shutdown complete");
                            break;
                        }
                        Err(e) => {
                            herald_common::tracing::error!("Dispatch processor shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Claim one batch of due jobs and dispatch them in parallel.
    ///
    /// Returns the number of jobs attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized or the store
    /// cannot list due jobs
    pub async fn process_once(&self) -> Result<usize> {
        let context = self.context()?;

        let due = context.store.due_jobs(Utc::now(), self.batch_size).await?;

        if due.is_empty() {
            return Ok(0);
        }

        let count = due.len();
        process::process_batch(context, due, self.max_concurrent_dispatches).await;

        Ok(count)
    }

    /// Sweep jobs stuck in `processing` back to `queued`.
    ///
    /// Returns the number of claims reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was never initialized or the store
    /// cannot be updated
    pub async fn sweep_once(&self) -> Result<usize> {
        let context = self.context()?;

        let reclaimed = context.store.reclaim_stale_jobs(self.stale_cutoff()).await?;
        for id in &reclaimed {
            internal!(level = WARN, "Reclaimed job {id} from a stale claim");
        }

        Ok(reclaimed.len())
    }

    fn context(&self) -> Result<DispatchContext> {
        match (&self.store, &self.registry, &self.mailer, &self.enqueuer) {
            (Some(store), Some(registry), Some(mailer), Some(enqueuer)) => Ok(DispatchContext {
                store: store.clone(),
                registry: registry.clone(),
                mailer: mailer.clone(),
                enqueuer: enqueuer.clone(),
                policy: RetryPolicy {
                    base_delay_secs: self.base_retry_delay_secs,
                    max_delay_secs: self.max_retry_delay_secs,
                    jitter_factor: self.retry_jitter_factor,
                },
            }),
            _ => Err(SystemError::NotInitialised(
                "Dispatch processor not initialised. Call init() first.".to_owned(),
            )
            .into()),
        }
    }

    fn stale_cutoff(&self) -> DateTime<Utc> {
        let stale = TimeDelta::seconds(i64::try_from(self.stale_claim_secs).unwrap_or(i64::MAX));

        Utc::now()
            .checked_sub_signed(stale)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
