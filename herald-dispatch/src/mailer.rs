//! SMTP transmission behind a mockable seam.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;
use herald_registry::{SmtpCredentials, TlsMode};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};

use crate::error::{DispatchError, PermanentError, Result, SystemError, TemporaryError};

/// One rendered message ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// The transmission seam between the dispatch processor and the network.
#[async_trait]
pub trait Mailer: Send + Sync + std::fmt::Debug {
    /// Transmit one message using `credentials`.
    ///
    /// # Errors
    ///
    /// Failures carry their retry class: permanent rejections, temporary
    /// transport problems, or system errors.
    async fn send(&self, credentials: &SmtpCredentials, email: &OutboundEmail) -> Result<()>;
}

/// Production mailer speaking SMTP through `lettre`.
///
/// A fresh transport is built for every attempt from the credentials resolved
/// for that attempt, so rotated passwords or hosts take effect on the next
/// retry and no connection state outlives an attempt.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(
        &self,
        credentials: &SmtpCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&credentials.host)
                .port(credentials.port)
                .timeout(Some(self.timeout));

        builder = match credentials.tls {
            TlsMode::Implicit => {
                let tls = TlsParameters::new(credentials.host.clone()).map_err(classify)?;
                builder.tls(Tls::Wrapper(tls))
            }
            TlsMode::StartTls => {
                let tls = TlsParameters::new(credentials.host.clone()).map_err(classify)?;
                builder.tls(Tls::Required(tls))
            }
            // Local test servers only.
            TlsMode::Plaintext => builder,
        };

        if !credentials.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, credentials: &SmtpCredentials, email: &OutboundEmail) -> Result<()> {
        let from = email.from.parse().map_err(|error| {
            PermanentError::Configuration(format!("Invalid from address {}: {error}", email.from))
        })?;
        let to = email.to.parse().map_err(|error| {
            PermanentError::InvalidRecipient(format!("{}: {error}", email.to))
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())
            .map_err(|error| {
                DispatchError::System(SystemError::Internal(format!(
                    "Failed to build message: {error}"
                )))
            })?;

        self.transport(credentials)?
            .send(message)
            .await
            .map_err(classify)?;

        Ok(())
    }
}

/// Map a transport failure onto the retry taxonomy.
///
/// - 4xx responses are temporary, retried with backoff
/// - 5xx responses are permanent (53x as failed authentication)
/// - network, TLS and timeout problems are temporary
/// - anything unrecognized is treated as temporary to err on the side of
///   another attempt
fn classify(error: lettre::transport::smtp::Error) -> DispatchError {
    let code = error.status().map(|code| code.to_string());
    let message = match &code {
        Some(code) => format!("{code} {error}"),
        None => error.to_string(),
    };

    if error.is_permanent() {
        if code.as_deref().is_some_and(|code| code.starts_with("53")) {
            DispatchError::Permanent(PermanentError::AuthenticationFailed(message))
        } else {
            DispatchError::Permanent(PermanentError::MessageRejected(message))
        }
    } else if error.is_transient() {
        DispatchError::Temporary(TemporaryError::SmtpTemporary(message))
    } else if error.is_timeout() {
        DispatchError::Temporary(TemporaryError::Timeout(message))
    } else if error.is_tls() {
        DispatchError::Temporary(TemporaryError::TlsHandshakeFailed(message))
    } else {
        DispatchError::Temporary(TemporaryError::ConnectionFailed(message))
    }
}

/// Scriptable mailer for exercising the processor without a mail server.
///
/// Outcomes are consumed oldest first; once the script runs dry every send
/// succeeds. Successful sends are recorded for inspection.
#[derive(Debug, Default)]
pub struct MockMailer {
    outcomes: Mutex<VecDeque<Result<()>>>,
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MockMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next unscripted send.
    pub fn script(&self, outcome: Result<()>) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    /// Every message transmitted so far.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// How many transmissions succeeded.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, _credentials: &SmtpCredentials, email: &OutboundEmail) -> Result<()> {
        let outcome = self
            .outcomes
            .lock()?
            .pop_front()
            .unwrap_or(Ok(()));

        if outcome.is_ok() {
            self.sent.lock()?.push(email.clone());
        }

        outcome
    }
}
