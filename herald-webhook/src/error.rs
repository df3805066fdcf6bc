pub type Result<T> = std::result::Result<T, WebhookError>;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] herald_store::StoreError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Webhook processor used before initialisation")]
    NotInitialised,
}
