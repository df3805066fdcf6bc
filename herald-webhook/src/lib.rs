//! Webhook callbacks for terminal job outcomes.
//!
//! When an email job reaches `sent` or `failed`, an application that has
//! webhooks enabled gets a signed HTTP notification. Enqueueing records a
//! [`WebhookDelivery`](herald_store::WebhookDelivery) alongside the job, and
//! the [`WebhookProcessor`] drains those records independently of email
//! dispatch, so a slow or broken callback endpoint never delays mail.

pub mod enqueue;
pub mod error;
pub mod payload;
pub mod processor;
pub mod signature;

pub use enqueue::WebhookEnqueuer;
pub use error::{Result, WebhookError};
pub use payload::WebhookPayload;
pub use processor::WebhookProcessor;
pub use signature::{
    DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, compute_signature, verify_signature,
};
