//! The JSON body POSTed to an application's callback URL.

use chrono::{DateTime, Utc};
use herald_common::id::{ApplicationId, JobId, TenantId};
use herald_store::{EmailJob, ErrorCategory, JobStatus, WebhookEvent};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Snapshot of a job's terminal outcome, serialized once at enqueue time.
///
/// The serialized form is stored on the delivery record verbatim and signed
/// as-is, so retries always POST the exact bytes the signature covers even if
/// the job record changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Wire event name, `email.sent` or `email.failed`.
    pub event: String,
    /// When the outcome was observed and the delivery enqueued.
    pub timestamp: DateTime<Utc>,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub service_name: String,
    pub to_email: String,
    pub status: JobStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl WebhookPayload {
    #[must_use]
    pub fn from_job(job: &EmailJob, event: WebhookEvent, now: DateTime<Utc>) -> Self {
        Self {
            event: event.as_str().to_owned(),
            timestamp: now,
            job_id: job.id,
            tenant_id: job.tenant_id,
            application_id: job.application_id,
            service_name: job.service_name.clone(),
            to_email: job.to_email.clone(),
            status: job.status,
            sent_at: job.sent_at,
            error_category: job.error_category,
            error_message: job.error_message.clone(),
            retry_count: job.retry_count,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
