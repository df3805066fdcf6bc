//! Email dispatch: claiming queued jobs and transmitting them over SMTP.
//!
//! The [`DispatchProcessor`] polls the store for due jobs, resolves each
//! job's service through the tenant directory, renders its template and
//! hands the result to a [`Mailer`]. Failures are classified as permanent
//! (dead-letter now), temporary (retry with backoff) or system (release the
//! claim, try again untouched). Terminal outcomes append to the audit log
//! and enqueue the webhook the application is owed.

pub mod error;
pub mod mailer;
pub mod processor;

pub use error::{DispatchError, PermanentError, Result, SystemError, TemporaryError};
pub use mailer::{Mailer, MockMailer, OutboundEmail, SmtpMailer};
pub use processor::DispatchProcessor;
