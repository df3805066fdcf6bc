pub mod error;
pub mod model;
pub mod registry;
pub mod secret;
pub mod template;

pub use error::{RegistryError, Result};
pub use model::{
    Application, EmailService, ResolvedService, SmtpConfig, SmtpCredentials, Template, TlsMode,
    WebhookSettings,
};
pub use registry::{Registry, hash_api_key};
pub use secret::{MasterKey, SealedSecret};
pub use template::render;
