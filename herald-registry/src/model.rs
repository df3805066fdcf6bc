//! Directory records: tenants' applications, services, templates and SMTP
//! configurations.
//!
//! The directory is loaded from the configuration file; managing it (CRUD,
//! admin UI) happens elsewhere. These types only need to deserialize and be
//! looked up.

use core::fmt;

use herald_common::id::{ApplicationId, TenantId};
use herald_store::WebhookEvent;
use serde::Deserialize;

use crate::secret::SealedSecret;

const fn default_true() -> bool {
    true
}

/// An API credential scope within a tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub tenant_id: TenantId,
    pub name: String,
    /// SHA-256 hex digest of the API key. The key itself is never stored.
    pub api_key_hash: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

/// Webhook callback configuration for an application.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Shared secret for HMAC payload signatures.
    #[serde(default)]
    pub secret: Option<String>,
    /// Events the application wants to hear about.
    #[serde(default = "default_events")]
    pub events: Vec<WebhookEvent>,
}

fn default_events() -> Vec<WebhookEvent> {
    vec![WebhookEvent::EmailSent, WebhookEvent::EmailFailed]
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            secret: None,
            events: default_events(),
        }
    }
}

impl WebhookSettings {
    #[must_use]
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.events.contains(&event)
    }
}

/// How the SMTP connection negotiates TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// Plaintext connection upgraded via STARTTLS.
    StartTls,
    /// No TLS at all. Local test servers only.
    Plaintext,
}

/// A named SMTP account, password sealed at rest.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SealedSecret,
    /// Explicit TLS override; omitted means derive from the port.
    #[serde(default)]
    pub tls: Option<TlsMode>,
}

impl SmtpConfig {
    /// The TLS mode to actually use: the explicit override if present,
    /// otherwise implicit TLS on port 465 and STARTTLS everywhere else.
    #[must_use]
    pub fn effective_tls(&self) -> TlsMode {
        self.tls.unwrap_or(if self.port == 465 {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        })
    }
}

/// A named subject/body template pair.
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub name: String,
    pub subject: String,
    pub body: String,
}

/// A sending service owned by a tenant, linking a from-address to a template
/// and an SMTP account.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailService {
    pub name: String,
    pub tenant_id: TenantId,
    pub from_email: String,
    /// Name of the linked [`Template`].
    pub template: String,
    /// Name of the linked [`SmtpConfig`].
    pub smtp: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Opened SMTP credentials for one dispatch attempt.
///
/// Carries the plaintext password, so it is never stored, never serialized
/// and its `Debug` form is redacted.
#[derive(Clone)]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"..")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Everything the dispatcher needs to transmit one job.
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub from_email: String,
    pub credentials: SmtpCredentials,
    pub template: Template,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{SmtpConfig, TlsMode, WebhookSettings};
    use crate::secret::SealedSecret;
    use herald_store::WebhookEvent;

    fn smtp(port: u16, tls: Option<TlsMode>) -> SmtpConfig {
        SmtpConfig {
            name: "primary".to_owned(),
            host: "smtp.example.com".to_owned(),
            port,
            username: "mailer".to_owned(),
            password: SealedSecret::new("sealed"),
            tls,
        }
    }

    #[test]
    fn tls_mode_follows_the_port() {
        assert_eq!(smtp(465, None).effective_tls(), TlsMode::Implicit);
        assert_eq!(smtp(587, None).effective_tls(), TlsMode::StartTls);
        assert_eq!(smtp(25, None).effective_tls(), TlsMode::StartTls);
    }

    #[test]
    fn explicit_tls_overrides_the_port() {
        assert_eq!(
            smtp(465, Some(TlsMode::Plaintext)).effective_tls(),
            TlsMode::Plaintext
        );
    }

    #[test]
    fn webhook_settings_default_to_both_events() {
        let settings = WebhookSettings::default();

        assert!(!settings.enabled);
        assert!(settings.subscribes_to(WebhookEvent::EmailSent));
        assert!(settings.subscribes_to(WebhookEvent::EmailFailed));
    }

    #[test]
    fn subscriptions_can_be_narrowed() {
        let settings = WebhookSettings {
            enabled: true,
            url: Some("https://example.com/hooks".to_owned()),
            secret: Some("shared".to_owned()),
            events: vec![WebhookEvent::EmailFailed],
        };

        assert!(!settings.subscribes_to(WebhookEvent::EmailSent));
        assert!(settings.subscribes_to(WebhookEvent::EmailFailed));
    }
}
