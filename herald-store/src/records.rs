//! Persistent records for the delivery pipeline.
//!
//! An [`EmailJob`] is one outbound send request and its lifecycle state. A
//! [`WebhookDelivery`] is one outbound HTTP notification owed for a job's
//! terminal outcome. An [`EmailLog`] entry is appended on every terminal job
//! transition and never mutated.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use herald_common::id::{ApplicationId, DeliveryId, JobId, LogId, TenantId};
use serde::{Deserialize, Serialize};

/// Lifecycle states of an email job.
///
/// `queued → processing → {sent | failed}`, with `failed → queued` reserved
/// for temporary errors with retries remaining (expressed as a direct
/// `processing → queued` requeue, so `failed` is always terminal once
/// stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        })
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed as-is. No retry.
    Permanent,
    /// May succeed later. Retried with backoff while retries remain.
    Temporary,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
        })
    }
}

/// Outcome events an application can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    EmailSent,
    EmailFailed,
}

impl WebhookEvent {
    /// The wire name carried in payloads and the `X-Herald-Event` header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailSent => "email.sent",
            Self::EmailFailed => "email.failed",
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound email send request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub service_name: String,
    pub to_email: String,
    pub variables: BTreeMap<String, String>,
    pub status: JobStatus,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Set once a webhook delivery has been enqueued for this job, guarding
    /// against duplicate deliveries if the terminal transition runs again.
    pub webhook_requested: bool,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set at most once, on the transition into `sent`. Proof of
    /// transmission: a reclaimed job carrying this stamp is finalized
    /// without sending again.
    pub sent_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl EmailJob {
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        application_id: ApplicationId,
        service_name: impl Into<String>,
        to_email: impl Into<String>,
        variables: BTreeMap<String, String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::generate(),
            tenant_id,
            application_id,
            service_name: service_name.into(),
            to_email: to_email.into(),
            variables,
            status: JobStatus::Queued,
            error_category: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            webhook_requested: false,
            created_at: Utc::now(),
            processing_started_at: None,
            sent_at: None,
            next_retry_at: None,
        }
    }

    /// Whether the job is ready to be claimed at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.next_retry_at.is_none_or(|at| at <= now)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Sent | JobStatus::Failed)
    }

    #[must_use]
    pub const fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.processing_started_at = Some(now);
    }

    /// Transition into `sent`, stamping `sent_at` only if it is not already
    /// set.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Sent;
        if self.sent_at.is_none() {
            self.sent_at = Some(now);
        }
        self.error_category = None;
        self.error_message = None;
        self.next_retry_at = None;
    }

    pub fn mark_failed(&mut self, category: ErrorCategory, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_category = Some(category);
        self.error_message = Some(message.into());
        self.next_retry_at = None;
    }

    /// Requeue after a temporary failure, consuming one retry.
    pub fn schedule_retry(&mut self, message: impl Into<String>, next_retry_at: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.error_category = Some(ErrorCategory::Temporary);
        self.error_message = Some(message.into());
        self.retry_count += 1;
        self.next_retry_at = Some(next_retry_at);
        self.processing_started_at = None;
    }

    /// Release a claim without consuming a retry. Used when the failure was
    /// ours (store unavailable, not initialized) rather than the job's.
    pub fn release(&mut self) {
        self.status = JobStatus::Queued;
        self.processing_started_at = None;
    }
}

/// Audit status of an [`EmailLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Delivered,
    Failed,
}

/// Append-only audit record of a terminal job transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: LogId,
    pub job_id: JobId,
    pub to_email: String,
    pub status: LogStatus,
    pub response_code: u16,
    pub response_message: String,
    pub created_at: DateTime<Utc>,
}

impl EmailLog {
    #[must_use]
    pub fn delivered(job: &EmailJob) -> Self {
        Self {
            id: LogId::generate(),
            job_id: job.id,
            to_email: job.to_email.clone(),
            status: LogStatus::Delivered,
            response_code: 200,
            response_message: "OK".to_owned(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(job: &EmailJob, message: impl Into<String>) -> Self {
        Self {
            id: LogId::generate(),
            job_id: job.id,
            to_email: job.to_email.clone(),
            status: LogStatus::Failed,
            response_code: 500,
            response_message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle states of a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivering,
    Delivered,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        })
    }
}

/// One outbound HTTP notification owed for a job's terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub event: WebhookEvent,
    /// Target URL snapshotted at enqueue time, so later configuration edits
    /// do not redirect an in-flight delivery.
    pub url: String,
    /// The exact JSON body to POST. Stored pre-serialized so the signature
    /// covers the bytes on the wire.
    pub payload: String,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub response_code: Option<u16>,
    /// Last response body, truncated for storage.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    #[must_use]
    pub fn new(
        job: &EmailJob,
        event: WebhookEvent,
        url: impl Into<String>,
        payload: String,
        max_retries: u32,
    ) -> Self {
        Self {
            id: DeliveryId::generate(),
            job_id: job.id,
            tenant_id: job.tenant_id,
            application_id: job.application_id,
            event,
            url: url.into(),
            payload,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            max_retries,
            response_code: None,
            response_body: None,
            error_message: None,
            created_at: Utc::now(),
            claimed_at: None,
            next_retry_at: None,
            delivered_at: None,
        }
    }

    /// Whether the delivery is ready to be claimed at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    #[must_use]
    pub const fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn mark_delivering(&mut self, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Delivering;
        self.claimed_at = Some(now);
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>, response_code: u16) {
        self.status = DeliveryStatus::Delivered;
        self.delivered_at = Some(now);
        self.response_code = Some(response_code);
        self.error_message = None;
        self.next_retry_at = None;
        self.claimed_at = None;
    }

    pub fn mark_failed(
        &mut self,
        response_code: Option<u16>,
        response_body: Option<String>,
        message: impl Into<String>,
    ) {
        self.status = DeliveryStatus::Failed;
        self.response_code = response_code;
        self.response_body = response_body;
        self.error_message = Some(message.into());
        self.next_retry_at = None;
        self.claimed_at = None;
    }

    /// Requeue after a temporary failure, consuming one retry.
    pub fn schedule_retry(
        &mut self,
        response_code: Option<u16>,
        response_body: Option<String>,
        message: impl Into<String>,
        next_retry_at: DateTime<Utc>,
    ) {
        self.status = DeliveryStatus::Pending;
        self.response_code = response_code;
        self.response_body = response_body;
        self.error_message = Some(message.into());
        self.retry_count += 1;
        self.next_retry_at = Some(next_retry_at);
        self.claimed_at = None;
    }

    /// Release a claim without consuming a retry.
    pub fn release(&mut self) {
        self.status = DeliveryStatus::Pending;
        self.claimed_at = None;
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use chrono::{TimeDelta, Utc};
    use herald_common::id::{ApplicationId, TenantId};
    use pretty_assertions::assert_eq;

    use super::{EmailJob, ErrorCategory, JobStatus, WebhookEvent};

    fn job() -> EmailJob {
        EmailJob::new(
            TenantId::generate(),
            ApplicationId::generate(),
            "welcome",
            "user@example.com",
            BTreeMap::new(),
            3,
        )
    }

    #[test]
    fn new_jobs_are_immediately_due() {
        let job = job();

        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.is_due(Utc::now()));
        assert!(!job.is_terminal());
    }

    #[test]
    fn scheduled_retries_are_not_due_until_their_time() {
        let mut job = job();
        let now = Utc::now();

        job.mark_processing(now);
        assert!(!job.is_due(now));

        job.schedule_retry("connection timed out", now + TimeDelta::seconds(60));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 1);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + TimeDelta::seconds(61)));
    }

    #[test]
    fn sent_at_is_stamped_only_once() {
        let mut job = job();
        let first = Utc::now();

        job.mark_sent(first);
        let stamped = job.sent_at;

        job.mark_sent(first + TimeDelta::seconds(30));
        assert_eq!(job.sent_at, stamped);
    }

    #[test]
    fn releasing_a_claim_consumes_no_retry() {
        let mut job = job();
        let now = Utc::now();

        job.mark_processing(now);
        job.release();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.processing_started_at, None);
    }

    #[test]
    fn failing_records_category_and_message() {
        let mut job = job();

        job.mark_failed(ErrorCategory::Permanent, "mailbox does not exist");

        assert!(job.is_terminal());
        assert_eq!(job.error_category, Some(ErrorCategory::Permanent));
        assert_eq!(job.error_message.as_deref(), Some("mailbox does not exist"));
    }

    #[test]
    fn events_use_their_wire_names() {
        assert_eq!(WebhookEvent::EmailSent.as_str(), "email.sent");
        assert_eq!(WebhookEvent::EmailFailed.to_string(), "email.failed");
    }
}
