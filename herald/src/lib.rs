//! The herald pipeline: asynchronous, multi-tenant transactional email with
//! webhook callbacks.
//!
//! A process runs one [`controller::Role`]: the intake API accepting send
//! requests, the email dispatch worker, the webhook delivery worker, or all
//! of them together. Processes coordinate purely through the shared store,
//! so roles can be scaled and restarted independently.

pub mod controller;

pub use controller::{Herald, Role, SHUTDOWN_BROADCAST};
