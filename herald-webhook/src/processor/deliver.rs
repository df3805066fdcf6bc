//! Delivery attempt logic for webhook callbacks.

use std::sync::Arc;

use chrono::Utc;
use herald_common::{
    backoff::RetryPolicy,
    id::DeliveryId,
    outgoing,
    tracing::{debug, error, warn},
};
use herald_registry::Registry;
use herald_store::{Store, WebhookDelivery};
use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinSet;

use crate::{
    error::Result,
    signature::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, compute_signature},
};

/// Stored response bodies are capped at this many bytes.
const RESPONSE_BODY_LIMIT: usize = 1024;

/// Everything one delivery attempt needs, cheap to clone per task.
#[derive(Debug, Clone)]
pub(crate) struct DeliverContext {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub client: reqwest::Client,
    pub policy: RetryPolicy,
}

/// Attempt a single delivery (spawned as a task)
async fn deliver_single(context: DeliverContext, id: DeliveryId) {
    if let Err(e) = try_deliver(&context, id).await {
        error!("Error delivering webhook {id}: {e}");
    }
}

/// POST a batch of due deliveries in parallel (up to `max_concurrent`)
pub(crate) async fn process_batch(
    context: DeliverContext,
    due: Vec<WebhookDelivery>,
    max_concurrent: usize,
) {
    let mut join_set: JoinSet<()> = JoinSet::new();
    let mut due_iter = due.into_iter();

    // Spawn initial batch of tasks (up to max_concurrent)
    for _ in 0..max_concurrent.min(due_iter.len()) {
        if let Some(delivery) = due_iter.next() {
            let context_clone = context.clone();

            join_set.spawn(async move {
                deliver_single(context_clone, delivery.id).await;
            });
        }
    }

    // As tasks complete, spawn new ones for remaining deliveries
    while join_set.join_next().await.is_some() {
        if let Some(delivery) = due_iter.next() {
            let context_clone = context.clone();

            join_set.spawn(async move {
                deliver_single(context_clone, delivery.id).await;
            });
        }
    }
}

/// Claim one delivery, POST it, and persist the outcome.
async fn try_deliver(context: &DeliverContext, id: DeliveryId) -> Result<()> {
    let Some(mut delivery) = context.store.claim_delivery(id, Utc::now()).await? else {
        debug!("Webhook delivery {id} was claimed elsewhere");
        return Ok(());
    };

    attempt(context, &mut delivery).await;

    context.store.update_delivery(&delivery).await?;

    Ok(())
}

/// Run one POST attempt, folding every outcome into the delivery's state.
async fn attempt(context: &DeliverContext, delivery: &mut WebhookDelivery) {
    let attempt = delivery.retry_count + 1;

    let Some(secret) = signing_secret(&context.registry, delivery) else {
        warn!(
            "Dead-lettering webhook delivery {}: application {} has no usable signing secret",
            delivery.id, delivery.application_id
        );
        delivery.mark_failed(None, None, "No signing secret configured for the application");
        return;
    };

    let signature = match compute_signature(&secret, delivery.payload.as_bytes()) {
        Ok(signature) => signature,
        Err(error) => {
            delivery.mark_failed(None, None, format!("Signing failed: {error}"));
            return;
        }
    };

    outgoing!(
        level = DEBUG,
        "POST {} (delivery {}, attempt {attempt})",
        delivery.url,
        delivery.id
    );

    let response = context
        .client
        .post(&delivery.url)
        .header(CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_HEADER, delivery.event.as_str())
        .header(DELIVERY_HEADER, delivery.id.to_string())
        .body(delivery.payload.clone())
        .send()
        .await;

    match response {
        Ok(response) => {
            let code = response.status().as_u16();
            let success = response.status().is_success();
            let rejected = response.status().is_client_error();
            let body = truncate_body(response.text().await.unwrap_or_default());

            if success {
                delivery.response_body = Some(body);
                delivery.mark_delivered(Utc::now(), code);
                outgoing!(
                    level = INFO,
                    "Delivered {} webhook {} with status {code}",
                    delivery.event,
                    delivery.id
                );
            } else if rejected {
                // The endpoint understood the request and refused it.
                // Retrying cannot change that answer.
                outgoing!(
                    level = WARN,
                    "Dead-lettering webhook delivery {} after status {code}",
                    delivery.id
                );
                delivery.mark_failed(
                    Some(code),
                    Some(body),
                    format!("Endpoint rejected the delivery with status {code}"),
                );
            } else {
                retry_or_fail(
                    delivery,
                    Some(code),
                    Some(body),
                    format!("Endpoint returned status {code}"),
                    context.policy,
                );
            }
        }
        Err(error) => {
            let message = if error.is_timeout() {
                "Request timed out".to_owned()
            } else {
                format!("Request failed: {error}")
            };

            retry_or_fail(delivery, None, None, message, context.policy);
        }
    }
}

/// The signing secret for a delivery's application, if one is usable.
fn signing_secret(registry: &Registry, delivery: &WebhookDelivery) -> Option<String> {
    registry
        .application(delivery.application_id)
        .and_then(|application| application.webhook.secret.clone())
        .filter(|secret| !secret.is_empty())
}

/// Requeue with backoff while retries remain, dead-letter once exhausted.
fn retry_or_fail(
    delivery: &mut WebhookDelivery,
    code: Option<u16>,
    body: Option<String>,
    message: String,
    policy: RetryPolicy,
) {
    if delivery.retries_remaining() {
        let next = policy.next_retry_at(Utc::now(), delivery.retry_count + 1);

        outgoing!(
            level = WARN,
            "Webhook delivery {} attempt {} failed ({message}), retrying at {next}",
            delivery.id,
            delivery.retry_count + 1
        );

        delivery.schedule_retry(code, body, message, next);
    } else {
        outgoing!(
            level = ERROR,
            "Webhook delivery {} failed after {} attempts: {message}",
            delivery.id,
            delivery.retry_count + 1
        );

        delivery.mark_failed(code, body, format!("Retries exhausted: {message}"));
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > RESPONSE_BODY_LIMIT {
        let mut cut = RESPONSE_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    body
}
