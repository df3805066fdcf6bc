//! Sealing and opening of at-rest SMTP passwords.
//!
//! Passwords live in the directory as AEAD ciphertexts (base64) and are only
//! opened at the moment a dispatch attempt needs them. The plaintext is never
//! persisted and never logged; `Debug` on every type here is redacted.

use core::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use orion::aead;
use serde::{
    Deserialize, Deserializer,
    de::{self, Visitor},
};

use crate::error::{RegistryError, Result};

/// The key that seals and opens every secret in the directory.
///
/// Opaque: exposes seal/open helpers but no access to the key material, so
/// it cannot leak through logs or serialization.
#[derive(Clone)]
pub struct MasterKey(Arc<aead::SecretKey>);

impl MasterKey {
    /// Generate a fresh key, returning it alongside its base64 form for
    /// writing into configuration.
    #[must_use]
    pub fn generate() -> (Self, String) {
        let key = aead::SecretKey::default();
        let encoded = STANDARD.encode(key.unprotected_as_bytes());

        (Self(Arc::new(key)), encoded)
    }

    /// Reconstruct the key from its base64 configuration form.
    ///
    /// # Errors
    /// Returns [`RegistryError::MasterKey`] if the input is not base64 or
    /// decodes to the wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|error| RegistryError::MasterKey(error.to_string()))?;
        let key = aead::SecretKey::from_slice(&bytes)
            .map_err(|error| RegistryError::MasterKey(error.to_string()))?;

        Ok(Self(Arc::new(key)))
    }

    /// Seal a plaintext secret for storage.
    ///
    /// A unique nonce is generated and included in the ciphertext, so
    /// sealing the same plaintext twice yields different envelopes.
    ///
    /// # Errors
    /// Returns [`RegistryError::Secret`] if encryption fails.
    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret> {
        let ciphertext = aead::seal(&self.0, plaintext.as_bytes())
            .map_err(|error| RegistryError::Secret(error.to_string()))?;

        Ok(SealedSecret(STANDARD.encode(ciphertext)))
    }

    /// Open a sealed secret.
    ///
    /// # Errors
    /// Returns [`RegistryError::Secret`] if the envelope is malformed or was
    /// sealed under a different key.
    pub fn open(&self, sealed: &SealedSecret) -> Result<String> {
        let ciphertext = STANDARD
            .decode(sealed.0.as_bytes())
            .map_err(|error| RegistryError::Secret(error.to_string()))?;
        let plaintext = aead::open(&self.0, &ciphertext)
            .map_err(|error| RegistryError::Secret(error.to_string()))?;

        String::from_utf8(plaintext).map_err(|error| RegistryError::Secret(error.to_string()))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl<'de> Deserialize<'de> for MasterKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MasterKeyVisitor;

        impl Visitor<'_> for MasterKeyVisitor {
            type Value = MasterKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a base64 encoded string representing a secret key")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                MasterKey::from_base64(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(MasterKeyVisitor)
    }
}

/// An AEAD-sealed secret in its base64 envelope form.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    #[must_use]
    pub fn new(envelope: impl Into<String>) -> Self {
        Self(envelope.into())
    }

    /// The base64 envelope, e.g. for writing into configuration. This is
    /// ciphertext, not the secret.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedSecret(..)")
    }
}
