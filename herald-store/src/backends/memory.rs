use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::id::{DeliveryId, JobId};

use crate::{
    StoreError,
    error::Result,
    records::{DeliveryStatus, EmailJob, EmailLog, JobStatus, WebhookDelivery, WebhookEvent},
    store::{JobStore, WebhookStore},
};

/// In-memory store implementation
///
/// Records live in `HashMap`s protected by `RwLock`s. Intended for testing
/// and single-process deployments.
///
/// # Concurrency
/// The claim and sweep operations hold the write lock across their whole
/// check-and-swap, so within a process they are atomic: of N concurrent
/// claimers for one row, exactly one observes the claimable status.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<RwLock<HashMap<JobId, EmailJob>>>,
    deliveries: Arc<RwLock<HashMap<DeliveryId, WebhookDelivery>>>,
    logs: Arc<RwLock<Vec<EmailLog>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently stored
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the
    /// underlying data.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Number of webhook deliveries currently stored
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.deliveries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &EmailJob) -> Result<()> {
        self.jobs.write()?.insert(job.id, job.clone());

        Ok(())
    }

    async fn job(&self, id: JobId) -> Result<Option<EmailJob>> {
        Ok(self.jobs.read()?.get(&id).cloned())
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<EmailJob>> {
        let mut due: Vec<_> = self
            .jobs
            .read()?
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();

        due.sort_by_key(|job| job.created_at);
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<Option<EmailJob>> {
        let mut jobs = self.jobs.write()?;

        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        if !job.is_due(now) {
            return Ok(None);
        }

        job.mark_processing(now);

        Ok(Some(job.clone()))
    }

    async fn update_job(&self, job: &EmailJob) -> Result<()> {
        let mut jobs = self.jobs.write()?;

        if !jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id));
        }

        jobs.insert(job.id, job.clone());

        Ok(())
    }

    async fn reclaim_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>> {
        let mut reclaimed = Vec::new();

        for job in self.jobs.write()?.values_mut() {
            if job.status == JobStatus::Processing
                && job.processing_started_at.is_some_and(|at| at < cutoff)
            {
                job.release();
                reclaimed.push(job.id);
            }
        }

        Ok(reclaimed)
    }

    async fn append_log(&self, log: &EmailLog) -> Result<()> {
        self.logs.write()?.push(log.clone());

        Ok(())
    }

    async fn logs_for_job(&self, id: JobId) -> Result<Vec<EmailLog>> {
        Ok(self
            .logs
            .read()?
            .iter()
            .filter(|log| log.job_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.deliveries.write()?.insert(delivery.id, delivery.clone());

        Ok(())
    }

    async fn delivery(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>> {
        Ok(self.deliveries.read()?.get(&id).cloned())
    }

    async fn due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut due: Vec<_> = self
            .deliveries
            .read()?
            .values()
            .filter(|delivery| delivery.is_due(now))
            .cloned()
            .collect();

        due.sort_by_key(|delivery| delivery.created_at);
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_delivery(
        &self,
        id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookDelivery>> {
        let mut deliveries = self.deliveries.write()?;

        let Some(delivery) = deliveries.get_mut(&id) else {
            return Ok(None);
        };

        if !delivery.is_due(now) {
            return Ok(None);
        }

        delivery.mark_delivering(now);

        Ok(Some(delivery.clone()))
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        let mut deliveries = self.deliveries.write()?;

        if !deliveries.contains_key(&delivery.id) {
            return Err(StoreError::DeliveryNotFound(delivery.id));
        }

        deliveries.insert(delivery.id, delivery.clone());

        Ok(())
    }

    async fn reclaim_stale_deliveries(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryId>> {
        let mut reclaimed = Vec::new();

        for delivery in self.deliveries.write()?.values_mut() {
            if delivery.status == DeliveryStatus::Delivering
                && delivery.claimed_at.is_some_and(|at| at < cutoff)
            {
                delivery.release();
                reclaimed.push(delivery.id);
            }
        }

        Ok(reclaimed)
    }

    async fn delivery_for_event(
        &self,
        job_id: JobId,
        event: WebhookEvent,
    ) -> Result<Option<DeliveryId>> {
        Ok(self
            .deliveries
            .read()?
            .values()
            .find(|delivery| delivery.job_id == job_id && delivery.event == event)
            .map(|delivery| delivery.id))
    }
}
