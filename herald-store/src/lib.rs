pub mod backends;
pub mod config;
pub mod error;
pub mod records;
pub mod store;

pub use backends::{FileStore, MemoryStore};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use records::{
    DeliveryStatus, EmailJob, EmailLog, ErrorCategory, JobStatus, LogStatus, WebhookDelivery,
    WebhookEvent,
};
pub use store::{JobStore, Store, WebhookStore};
