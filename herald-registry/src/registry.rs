//! The directory itself: API-key authorization and service resolution.

use herald_common::id::{ApplicationId, TenantId};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    error::{RegistryError, Result},
    model::{Application, EmailService, ResolvedService, SmtpConfig, SmtpCredentials, Template},
    secret::MasterKey,
};

/// SHA-256 hex digest of an API key, the only form the directory stores.
#[must_use]
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// The tenant/application/service directory, loaded from configuration.
///
/// Lookups are linear scans: the directory is the size of a config file, not
/// a database. Credentials are resolved fresh on every call, so a rotated
/// password or URL takes effect on the next attempt without a restart.
#[derive(Debug, Deserialize)]
pub struct Registry {
    master_key: MasterKey,
    #[serde(default)]
    applications: Vec<Application>,
    #[serde(default)]
    services: Vec<EmailService>,
    #[serde(default)]
    templates: Vec<Template>,
    #[serde(default)]
    smtp_configs: Vec<SmtpConfig>,
}

impl Registry {
    /// Assemble a directory in code rather than from configuration.
    #[must_use]
    pub const fn new(
        master_key: MasterKey,
        applications: Vec<Application>,
        services: Vec<EmailService>,
        templates: Vec<Template>,
        smtp_configs: Vec<SmtpConfig>,
    ) -> Self {
        Self {
            master_key,
            applications,
            services,
            templates,
            smtp_configs,
        }
    }

    /// Find the active application the presented API key belongs to.
    ///
    /// # Errors
    /// [`RegistryError::UnknownApiKey`] if no application matches,
    /// [`RegistryError::ApplicationDisabled`] if one does but is inactive.
    pub fn authorize(&self, api_key: &str) -> Result<&Application> {
        let hash = hash_api_key(api_key);

        let application = self
            .applications
            .iter()
            .find(|application| application.api_key_hash == hash)
            .ok_or(RegistryError::UnknownApiKey)?;

        if !application.active {
            return Err(RegistryError::ApplicationDisabled(
                application.name.clone(),
            ));
        }

        Ok(application)
    }

    /// Look up an application by id.
    #[must_use]
    pub fn application(&self, id: ApplicationId) -> Option<&Application> {
        self.applications
            .iter()
            .find(|application| application.id == id)
    }

    /// Find an active service by tenant and name without touching secrets.
    ///
    /// This is the intake-time check: it distinguishes "no such service"
    /// from "service exists but is switched off" so the API can answer 404
    /// versus 400.
    ///
    /// # Errors
    /// [`RegistryError::UnknownService`] or [`RegistryError::ServiceDisabled`].
    pub fn validate_service(&self, tenant_id: TenantId, name: &str) -> Result<&EmailService> {
        let service = self
            .services
            .iter()
            .find(|service| service.tenant_id == tenant_id && service.name == name)
            .ok_or_else(|| RegistryError::UnknownService(name.to_owned()))?;

        if !service.active {
            return Err(RegistryError::ServiceDisabled(name.to_owned()));
        }

        Ok(service)
    }

    /// Resolve everything a dispatch attempt needs: from-address, opened
    /// SMTP credentials and the template.
    ///
    /// # Errors
    /// Any missing or inactive link in the chain, or a secret that will not
    /// open. All of these are permanent for the calling job.
    pub fn resolve(&self, tenant_id: TenantId, service_name: &str) -> Result<ResolvedService> {
        let service = self.validate_service(tenant_id, service_name)?;

        let smtp = self
            .smtp_configs
            .iter()
            .find(|config| config.name == service.smtp)
            .ok_or_else(|| RegistryError::MissingSmtp(service_name.to_owned()))?;

        let template = self
            .templates
            .iter()
            .find(|template| template.name == service.template)
            .ok_or_else(|| RegistryError::MissingTemplate(service_name.to_owned()))?;

        let password = self.master_key.open(&smtp.password)?;

        debug!(
            "Resolved service {service_name} to {}:{} for tenant {tenant_id}",
            smtp.host, smtp.port
        );

        Ok(ResolvedService {
            from_email: service.from_email.clone(),
            credentials: SmtpCredentials {
                host: smtp.host.clone(),
                port: smtp.port,
                username: smtp.username.clone(),
                password,
                tls: smtp.effective_tls(),
            },
            template: template.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use herald_common::id::{ApplicationId, TenantId};
    use pretty_assertions::assert_eq;

    use super::{Registry, hash_api_key};
    use crate::{
        error::RegistryError,
        model::{Application, EmailService, SmtpConfig, Template, TlsMode, WebhookSettings},
        secret::MasterKey,
    };

    fn registry() -> (Registry, TenantId, ApplicationId) {
        let (master_key, _) = MasterKey::generate();
        let tenant_id = TenantId::generate();
        let application_id = ApplicationId::generate();

        let registry = Registry {
            applications: vec![Application {
                id: application_id,
                tenant_id,
                name: "storefront".to_owned(),
                api_key_hash: hash_api_key("live-key"),
                active: true,
                webhook: WebhookSettings::default(),
            }],
            services: vec![
                EmailService {
                    name: "welcome".to_owned(),
                    tenant_id,
                    from_email: "no-reply@example.com".to_owned(),
                    template: "welcome".to_owned(),
                    smtp: "primary".to_owned(),
                    active: true,
                },
                EmailService {
                    name: "newsletter".to_owned(),
                    tenant_id,
                    from_email: "news@example.com".to_owned(),
                    template: "welcome".to_owned(),
                    smtp: "primary".to_owned(),
                    active: false,
                },
                EmailService {
                    name: "orphaned".to_owned(),
                    tenant_id,
                    from_email: "no-reply@example.com".to_owned(),
                    template: "missing".to_owned(),
                    smtp: "missing".to_owned(),
                    active: true,
                },
            ],
            templates: vec![Template {
                name: "welcome".to_owned(),
                subject: "Welcome, {{name}}!".to_owned(),
                body: "Hello {{name}}".to_owned(),
            }],
            smtp_configs: vec![SmtpConfig {
                name: "primary".to_owned(),
                host: "smtp.example.com".to_owned(),
                port: 587,
                username: "mailer".to_owned(),
                password: master_key.seal("hunter2").unwrap(),
                tls: None,
            }],
            master_key,
        };

        (registry, tenant_id, application_id)
    }

    #[test]
    fn authorizes_known_active_keys() {
        let (registry, _, application_id) = registry();

        let application = registry.authorize("live-key").unwrap();
        assert_eq!(application.id, application_id);

        assert!(matches!(
            registry.authorize("wrong-key"),
            Err(RegistryError::UnknownApiKey)
        ));
    }

    #[test]
    fn disabled_applications_are_rejected() {
        let (mut registry, _, _) = registry();
        registry.applications[0].active = false;

        assert!(matches!(
            registry.authorize("live-key"),
            Err(RegistryError::ApplicationDisabled(_))
        ));
    }

    #[test]
    fn resolves_credentials_and_template() {
        let (registry, tenant_id, _) = registry();

        let resolved = registry.resolve(tenant_id, "welcome").unwrap();

        assert_eq!(resolved.from_email, "no-reply@example.com");
        assert_eq!(resolved.credentials.host, "smtp.example.com");
        assert_eq!(resolved.credentials.password, "hunter2");
        assert_eq!(resolved.credentials.tls, TlsMode::StartTls);
        assert_eq!(resolved.template.subject, "Welcome, {{name}}!");
    }

    #[test]
    fn resolution_failures_name_the_link() {
        let (registry, tenant_id, _) = registry();

        assert!(matches!(
            registry.resolve(tenant_id, "no-such-service"),
            Err(RegistryError::UnknownService(_))
        ));
        assert!(matches!(
            registry.resolve(tenant_id, "newsletter"),
            Err(RegistryError::ServiceDisabled(_))
        ));
        assert!(matches!(
            registry.resolve(tenant_id, "orphaned"),
            Err(RegistryError::MissingSmtp(_))
        ));
        assert!(matches!(
            registry.resolve(TenantId::generate(), "welcome"),
            Err(RegistryError::UnknownService(_))
        ));
    }

    #[test]
    fn secrets_sealed_under_another_key_fail_resolution() {
        let (mut registry, tenant_id, _) = registry();

        let (other_key, _) = MasterKey::generate();
        registry.smtp_configs[0].password = other_key.seal("hunter2").unwrap();

        assert!(matches!(
            registry.resolve(tenant_id, "welcome"),
            Err(RegistryError::Secret(_))
        ));
    }

    #[test]
    fn loads_from_ron() {
        let (master_key, encoded) = MasterKey::generate();
        let sealed = master_key.seal("hunter2").unwrap();
        let tenant_id = TenantId::generate();

        let config = format!(
            r#"(
    master_key: "{encoded}",
    applications: [
        (
            id: "{application_id}",
            tenant_id: "{tenant_id}",
            name: "storefront",
            api_key_hash: "{hash}",
            webhook: (
                enabled: true,
                url: Some("https://example.com/hooks"),
                secret: Some("shared"),
            ),
        ),
    ],
    services: [
        (
            name: "welcome",
            tenant_id: "{tenant_id}",
            from_email: "no-reply@example.com",
            template: "welcome",
            smtp: "primary",
        ),
    ],
    templates: [
        (name: "welcome", subject: "Hi {{{{name}}}}", body: "Hello"),
    ],
    smtp_configs: [
        (
            name: "primary",
            host: "smtp.example.com",
            port: 465,
            username: "mailer",
            password: "{sealed}",
        ),
    ],
)"#,
            application_id = ApplicationId::generate(),
            hash = hash_api_key("live-key"),
            sealed = sealed.as_str(),
        );

        let registry: Registry = ron::from_str(&config).unwrap();

        let application = registry.authorize("live-key").unwrap();
        assert!(application.webhook.enabled);
        assert!(application.webhook.subscribes_to(herald_store::WebhookEvent::EmailSent));

        let resolved = registry.resolve(tenant_id, "welcome").unwrap();
        assert_eq!(resolved.credentials.password, "hunter2");
        assert_eq!(resolved.credentials.tls, TlsMode::Implicit);
    }
}
