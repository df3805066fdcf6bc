//! Recording the webhook owed for a job's terminal outcome.

use std::sync::Arc;

use chrono::Utc;
use herald_common::{id::DeliveryId, internal};
use herald_registry::Application;
use herald_store::{EmailJob, Store, WebhookDelivery, WebhookEvent};

use crate::{error::Result, payload::WebhookPayload};

/// Decides whether a terminal job owes a callback and records it if so.
///
/// Runs inline with the job's terminal transition, before the job's final
/// state is persisted, so a crash between the two leaves a delivery row
/// behind rather than losing one. The job's `webhook_requested` flag and the
/// store's one-delivery-per-event lookup keep the rerun from duplicating it.
#[derive(Debug, Clone)]
pub struct WebhookEnqueuer {
    store: Arc<dyn Store>,
    max_retries: u32,
}

impl WebhookEnqueuer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Enqueue the delivery owed for `event`, if one is owed at all.
    ///
    /// Skips silently (at debug level) when the application has webhooks
    /// disabled, has no URL, or is not subscribed to `event`. Returns the new
    /// delivery's id, or `None` when nothing was enqueued.
    ///
    /// Mutates `job` by setting `webhook_requested`; the caller persists the
    /// job afterwards as part of its terminal update.
    pub async fn enqueue(
        &self,
        job: &mut EmailJob,
        application: &Application,
        event: WebhookEvent,
    ) -> Result<Option<DeliveryId>> {
        if job.webhook_requested {
            internal!(level = DEBUG, "Webhook already enqueued for job {}", job.id);
            return Ok(None);
        }

        let webhook = &application.webhook;

        if !webhook.enabled {
            internal!(
                level = DEBUG,
                "Webhooks disabled for application {}",
                application.name
            );
            return Ok(None);
        }

        let Some(url) = webhook.url.as_deref().filter(|url| !url.is_empty()) else {
            internal!(
                level = DEBUG,
                "No webhook URL configured for application {}",
                application.name
            );
            return Ok(None);
        };

        if !webhook.subscribes_to(event) {
            internal!(
                level = DEBUG,
                "Application {} is not subscribed to {event}",
                application.name
            );
            return Ok(None);
        }

        // A delivery already on disk with a cleared flag means a previous
        // terminal transition got partway through. Repair the flag, enqueue
        // nothing.
        if let Some(existing) = self.store.delivery_for_event(job.id, event).await? {
            internal!(
                level = DEBUG,
                "Delivery {existing} already recorded for job {}",
                job.id
            );
            job.webhook_requested = true;
            return Ok(None);
        }

        let payload = WebhookPayload::from_job(job, event, Utc::now()).to_json()?;
        let delivery = WebhookDelivery::new(job, event, url, payload, self.max_retries);

        self.store.insert_delivery(&delivery).await?;
        job.webhook_requested = true;

        internal!(
            level = DEBUG,
            "Enqueued {event} delivery {} for job {}",
            delivery.id,
            job.id
        );

        Ok(Some(delivery.id))
    }
}
