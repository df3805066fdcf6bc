//! Storage traits for the delivery pipeline.
//!
//! The claim operations are the synchronization point for the worker pools:
//! each performs an atomic conditional update (check the current status, swap
//! in the in-flight status, stamp the claim time) so that exactly one of any
//! number of concurrent claimers wins a given row. Workers in separate
//! processes coordinate through the store alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::id::{DeliveryId, JobId};

use crate::{
    error::Result,
    records::{EmailJob, EmailLog, WebhookDelivery, WebhookEvent},
};

/// Durable storage for email jobs and their audit log.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Persist a new job.
    async fn insert_job(&self, job: &EmailJob) -> Result<()>;

    /// Fetch a job by id.
    async fn job(&self, id: JobId) -> Result<Option<EmailJob>>;

    /// Jobs in `queued` whose `next_retry_at` is absent or has passed,
    /// oldest first, at most `limit`.
    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>>;

    /// Atomically claim a `queued` job for processing.
    ///
    /// Returns the job with `processing` and `processing_started_at`
    /// stamped, or `None` if the job is no longer claimable (another worker
    /// won it, or it is not due).
    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<EmailJob>>;

    /// Persist the current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`](crate::StoreError::JobNotFound)
    /// if the job was never inserted.
    async fn update_job(&self, job: &EmailJob) -> Result<()>;

    /// Reset jobs stuck in `processing` since before `cutoff` back to
    /// `queued`, returning the ids that were reset.
    async fn reclaim_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>>;

    /// Append an audit log entry.
    async fn append_log(&self, log: &EmailLog) -> Result<()>;

    /// Audit log entries for a job, oldest first.
    async fn logs_for_job(&self, id: JobId) -> Result<Vec<EmailLog>>;
}

/// Durable storage for webhook deliveries.
#[async_trait]
pub trait WebhookStore: Send + Sync + std::fmt::Debug {
    /// Persist a new delivery.
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Fetch a delivery by id.
    async fn delivery(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>>;

    /// Deliveries in `pending` whose `next_retry_at` is absent or has
    /// passed, oldest first, at most `limit`.
    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>>;

    /// Atomically claim a `pending` delivery.
    ///
    /// Returns the delivery with `delivering` and `claimed_at` stamped, or
    /// `None` if the delivery is no longer claimable.
    async fn claim_delivery(
        &self,
        id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>>;

    /// Persist the current state of a delivery.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`StoreError::DeliveryNotFound`](crate::StoreError::DeliveryNotFound)
    /// if the delivery was never inserted.
    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Reset deliveries stuck in `delivering` since before `cutoff` back to
    /// `pending`, returning the ids that were reset.
    async fn reclaim_stale_deliveries(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryId>>;

    /// The existing delivery for `(job_id, event)`, if one was ever
    /// enqueued.
    async fn delivery_for_event(
        &self,
        job_id: JobId,
        event: WebhookEvent,
    ) -> Result<Option<DeliveryId>>;
}

/// Full pipeline storage.
pub trait Store: JobStore + WebhookStore {}

impl<T: JobStore + WebhookStore> Store for T {}
