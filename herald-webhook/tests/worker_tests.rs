//! End-to-end webhook delivery against a scripted HTTP endpoint.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use herald_common::id::{ApplicationId, TenantId};
use herald_registry::{Application, MasterKey, Registry, WebhookSettings};
use herald_store::{
    DeliveryStatus, EmailJob, MemoryStore, WebhookDelivery, WebhookEvent, WebhookStore,
};
use herald_webhook::{WebhookPayload, WebhookProcessor, verify_signature};
use pretty_assertions::assert_eq;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const SECRET: &str = "whsec_test";

fn application() -> Application {
    Application {
        id: ApplicationId::generate(),
        tenant_id: TenantId::generate(),
        name: "storefront".to_owned(),
        api_key_hash: String::new(),
        active: true,
        webhook: WebhookSettings {
            enabled: true,
            url: None,
            secret: Some(SECRET.to_owned()),
            events: vec![WebhookEvent::EmailSent, WebhookEvent::EmailFailed],
        },
    }
}

fn registry_with(applications: Vec<Application>) -> Arc<Registry> {
    let (master_key, _) = MasterKey::generate();

    Arc::new(Registry::new(
        master_key,
        applications,
        vec![],
        vec![],
        vec![],
    ))
}

/// A processor wired for tests: zero backoff so retried deliveries are due
/// again on the very next poll.
fn processor(store: &Arc<MemoryStore>, registry: Arc<Registry>) -> WebhookProcessor {
    let mut processor: WebhookProcessor = serde_json::from_value(serde_json::json!({
        "base_retry_delay_secs": 0,
        "max_retry_delay_secs": 0,
        "retry_jitter_factor": 0.0,
        "request_timeout_secs": 1,
    }))
    .unwrap();

    processor
        .init(store.clone(), registry)
        .unwrap_or_else(|error| panic!("processor init failed: {error}"));
    processor
}

async fn enqueue_delivery(
    store: &Arc<MemoryStore>,
    application: &Application,
    url: &str,
    max_retries: u32,
) -> WebhookDelivery {
    let mut job = EmailJob::new(
        application.tenant_id,
        application.id,
        "welcome",
        "user@example.com",
        BTreeMap::new(),
        3,
    );
    job.mark_sent(Utc::now());

    let payload = WebhookPayload::from_job(&job, WebhookEvent::EmailSent, Utc::now())
        .to_json()
        .unwrap_or_else(|error| panic!("payload serialization failed: {error}"));

    let delivery = WebhookDelivery::new(&job, WebhookEvent::EmailSent, url, payload, max_retries);
    store.insert_delivery(&delivery).await.unwrap();
    delivery
}

#[tokio::test]
async fn a_healthy_endpoint_gets_exactly_one_signed_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery =
        enqueue_delivery(&store, &application, &format!("{}/hooks", server.uri()), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Delivered);
    assert_eq!(stored.response_code, Some(200));
    assert_eq!(stored.retry_count, 0);
    assert!(stored.delivered_at.is_some());
    assert_eq!(stored.claimed_at, None);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];

    assert_eq!(request.body, delivery.payload.as_bytes());
    assert_eq!(
        request.headers.get("Content-Type").unwrap(),
        "application/json"
    );
    assert_eq!(request.headers.get("X-Herald-Event").unwrap(), "email.sent");
    assert_eq!(
        request.headers.get("X-Herald-Delivery").unwrap(),
        delivery.id.to_string().as_str()
    );

    let signature = request
        .headers
        .get("X-Herald-Signature")
        .unwrap()
        .to_str()
        .unwrap();
    verify_signature(SECRET, &request.body, signature).unwrap();

    let agent = request
        .headers
        .get("User-Agent")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(agent.starts_with("herald-webhook/"));
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);
    let after_first = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, DeliveryStatus::Pending);
    assert_eq!(after_first.retry_count, 1);
    assert_eq!(after_first.response_code, Some(500));
    assert_eq!(
        after_first.response_body.as_deref(),
        Some("upstream exploded")
    );

    assert_eq!(processor.process_once().await.unwrap(), 1);
    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Delivered);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.response_code, Some(200));
}

#[tokio::test]
async fn client_rejections_dead_letter_without_a_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.response_code, Some(404));
    assert_eq!(stored.response_body.as_deref(), Some("no such hook"));
    assert_eq!(stored.next_retry_at, None);

    // Dead letters are no longer due.
    assert_eq!(processor.process_once().await.unwrap(), 0);
}

#[tokio::test]
async fn retries_exhaust_into_a_dead_letter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 2).await;

    for _ in 0..3 {
        assert_eq!(processor.process_once().await.unwrap(), 1);
    }

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.response_code, Some(503));
    assert!(
        stored
            .error_message
            .as_deref()
            .unwrap()
            .contains("Retries exhausted")
    );
}

#[tokio::test]
async fn timeouts_count_as_temporary_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.response_code, None);
    assert_eq!(stored.error_message.as_deref(), Some("Request timed out"));
}

#[tokio::test]
async fn long_response_bodies_are_truncated_for_storage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 0).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.response_body.unwrap().len(), 1024);
}

#[tokio::test]
async fn a_missing_signing_secret_dead_letters_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let mut application = application();
    application.webhook.secret = None;
    let processor = processor(&store, registry_with(vec![application.clone()]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert!(
        stored
            .error_message
            .as_deref()
            .unwrap()
            .contains("signing secret")
    );
}

#[tokio::test]
async fn deliveries_for_unknown_applications_dead_letter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let application = application();
    // The registry does not know this application at all.
    let processor = processor(&store, registry_with(vec![]));

    let delivery = enqueue_delivery(&store, &application, &server.uri(), 3).await;

    assert_eq!(processor.process_once().await.unwrap(), 1);

    let stored = store.delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Failed);
    assert_eq!(stored.retry_count, 0);
}
