//! Test support utilities for end-to-end pipeline testing
//!
//! This module provides infrastructure for exercising the complete herald
//! pipeline, from HTTP intake through dispatch to webhook delivery.

pub mod harness;

pub use harness::{API_KEY, PipelineHarness, WEBHOOK_SECRET};
