//! Per-job dispatch logic.
//!
//! The ordering inside finalization is load-bearing. A successful
//! transmission persists `sent_at` while the job is still `processing`, then
//! appends the audit log, then enqueues the webhook, then persists the
//! terminal state. A crash between any two steps leaves the job claimable,
//! and the rerun skips whatever already happened: the `sent_at` stamp stops
//! a second transmission, the log append checks for an existing entry, and
//! the enqueuer checks for an existing delivery.

use std::sync::Arc;

use chrono::Utc;
use herald_common::{
    backoff::RetryPolicy,
    id::JobId,
    outgoing,
    tracing::{debug, error, warn},
};
use herald_registry::{Registry, render};
use herald_store::{EmailJob, EmailLog, ErrorCategory, Store, WebhookEvent};
use herald_webhook::WebhookEnqueuer;
use tokio::task::JoinSet;

use crate::{
    error::{DispatchError, Result},
    mailer::{Mailer, OutboundEmail},
};

/// Everything one dispatch attempt needs, cheap to clone per task.
#[derive(Debug, Clone)]
pub(crate) struct DispatchContext {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub mailer: Arc<dyn Mailer>,
    pub enqueuer: WebhookEnqueuer,
    pub policy: RetryPolicy,
}

/// Dispatch a single job (spawned as a task)
async fn dispatch_single(context: DispatchContext, id: JobId) {
    if let Err(e) = try_process(&context, id).await {
        error!("Error processing job {id}: {e}");
    }
}

/// Dispatch a batch of due jobs in parallel (up to `max_concurrent`)
pub(crate) async fn process_batch(
    context: DispatchContext,
    due: Vec<EmailJob>,
    max_concurrent: usize,
) {
    let mut join_set: JoinSet<()> = JoinSet::new();
    let mut due_iter = due.into_iter();

    // Spawn initial batch of tasks (up to max_concurrent)
    for _ in 0..max_concurrent.min(due_iter.len()) {
        if let Some(job) = due_iter.next() {
            let context_clone = context.clone();

            join_set.spawn(async move {
                dispatch_single(context_clone, job.id).await;
            });
        }
    }

    // As tasks complete, spawn new ones for remaining jobs
    while join_set.join_next().await.is_some() {
        if let Some(job) = due_iter.next() {
            let context_clone = context.clone();

            join_set.spawn(async move {
                dispatch_single(context_clone, job.id).await;
            });
        }
    }
}

/// Claim one job, transmit it, and persist the outcome.
async fn try_process(context: &DispatchContext, id: JobId) -> Result<()> {
    let Some(mut job) = context.store.claim_job(id, Utc::now()).await? else {
        debug!("Job {id} was claimed elsewhere");
        return Ok(());
    };

    // A reclaimed job carrying a transmission stamp already went out the
    // wire. Finish its bookkeeping, do not send a second copy.
    if job.sent_at.is_some() {
        warn!("Job {id} reclaimed after transmission, finalising without a resend");
        return finalize_sent(context, job).await;
    }

    match transmit(context, &mut job).await {
        Ok(()) => finalize_sent(context, job).await,
        Err(error) => handle_failure(context, job, error).await,
    }
}

/// Resolve the job's service, render its template and hand it to the mailer.
///
/// On success, persists the `sent_at` stamp immediately, before any of the
/// finalization steps run.
async fn transmit(context: &DispatchContext, job: &mut EmailJob) -> Result<()> {
    let resolved = context.registry.resolve(job.tenant_id, &job.service_name)?;

    let email = OutboundEmail {
        from: resolved.from_email,
        to: job.to_email.clone(),
        subject: render(&resolved.template.subject, &job.variables),
        body: render(&resolved.template.body, &job.variables),
    };

    outgoing!(
        level = DEBUG,
        "Transmitting job {} to {} via {}:{} (attempt {})",
        job.id,
        job.to_email,
        resolved.credentials.host,
        resolved.credentials.port,
        job.retry_count + 1
    );

    context.mailer.send(&resolved.credentials, &email).await?;

    job.sent_at = Some(Utc::now());
    context.store.update_job(job).await?;

    Ok(())
}

/// Record the terminal `sent` state: audit log, webhook, final update.
async fn finalize_sent(context: &DispatchContext, mut job: EmailJob) -> Result<()> {
    job.mark_sent(Utc::now());

    append_log_once(context, EmailLog::delivered(&job)).await?;
    enqueue_webhook(context, &mut job, WebhookEvent::EmailSent).await?;

    context.store.update_job(&job).await?;

    outgoing!(
        level = INFO,
        "Job {} delivered to {} after {} retries",
        job.id,
        job.to_email,
        job.retry_count
    );

    Ok(())
}

/// Record the terminal `failed` state: audit log, webhook, final update.
async fn finalize_failed(
    context: &DispatchContext,
    mut job: EmailJob,
    category: ErrorCategory,
    message: String,
) -> Result<()> {
    job.mark_failed(category, message.as_str());

    append_log_once(context, EmailLog::failed(&job, message.as_str())).await?;
    enqueue_webhook(context, &mut job, WebhookEvent::EmailFailed).await?;

    context.store.update_job(&job).await?;

    outgoing!(
        level = ERROR,
        "Job {} failed ({category}) for {}: {message}",
        job.id,
        job.to_email
    );

    Ok(())
}

/// Fold a dispatch error into the job's next state.
async fn handle_failure(
    context: &DispatchContext,
    mut job: EmailJob,
    error: DispatchError,
) -> Result<()> {
    match error {
        DispatchError::System(system) => {
            // Our failure, not the job's. Put the claim back without
            // consuming a retry.
            error!("System error processing job {}, releasing its claim: {system}", job.id);

            job.release();
            context.store.update_job(&job).await?;

            Ok(())
        }
        DispatchError::Temporary(temporary) if job.retries_remaining() => {
            let attempt = job.retry_count + 1;
            let next_retry_at = context.policy.next_retry_at(Utc::now(), attempt);

            warn!(
                "Job {} attempt {attempt} failed temporarily, retrying at {next_retry_at}: {temporary}",
                job.id
            );

            job.schedule_retry(temporary.to_string(), next_retry_at);
            context.store.update_job(&job).await?;

            Ok(())
        }
        DispatchError::Temporary(temporary) => {
            finalize_failed(
                context,
                job,
                ErrorCategory::Temporary,
                format!("Retries exhausted: {temporary}"),
            )
            .await
        }
        DispatchError::Permanent(permanent) => {
            finalize_failed(context, job, ErrorCategory::Permanent, permanent.to_string()).await
        }
    }
}

/// Append an audit entry unless one with the same status already exists.
///
/// Finalization can run twice for the same outcome (reclaim after a partial
/// run); the audit log still gets exactly one entry per outcome.
async fn append_log_once(context: &DispatchContext, log: EmailLog) -> Result<()> {
    let existing = context.store.logs_for_job(log.job_id).await?;

    if existing.iter().any(|entry| entry.status == log.status) {
        debug!("Audit entry for job {} already recorded", log.job_id);
        return Ok(());
    }

    context.store.append_log(&log).await?;

    Ok(())
}

/// Enqueue the webhook owed for `event`, keeping the job claimable if the
/// store refuses.
///
/// An application that has vanished from the directory since intake gets a
/// warning instead of a callback; the job's own outcome stands.
async fn enqueue_webhook(
    context: &DispatchContext,
    job: &mut EmailJob,
    event: WebhookEvent,
) -> Result<()> {
    let Some(application) = context.registry.application(job.application_id) else {
        warn!(
            "Application {} for job {} is gone from the directory, skipping its webhook",
            job.application_id, job.id
        );
        return Ok(());
    };

    context.enqueuer.enqueue(job, application, event).await?;

    Ok(())
}
