//! HMAC-SHA256 payload signing.
//!
//! Every delivery is signed with the application's webhook secret so the
//! receiving endpoint can authenticate the caller. The signature covers the
//! request body bytes exactly as sent.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Carries `sha256=<hex>` over the request body.
pub const SIGNATURE_HEADER: &str = "X-Herald-Signature";
/// Carries the wire event name, `email.sent` or `email.failed`.
pub const EVENT_HEADER: &str = "X-Herald-Event";
/// Carries the delivery id, unique per attempt series.
pub const DELIVERY_HEADER: &str = "X-Herald-Delivery";

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|error| WebhookError::Signature(error.to_string()))
}

/// Sign `payload` with `secret`, producing the `X-Herald-Signature` value.
pub fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = mac(secret)?;
    mac.update(payload);

    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check a received `X-Herald-Signature` value against `payload`.
///
/// The comparison is constant time. Errors distinguish a malformed header
/// from a genuine mismatch.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> Result<()> {
    let hex_digest = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| WebhookError::Signature(format!("Missing '{SIGNATURE_PREFIX}' prefix")))?;

    let digest =
        hex::decode(hex_digest).map_err(|error| WebhookError::Signature(error.to_string()))?;

    let mut mac = mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&digest)
        .map_err(|_| WebhookError::Signature("Signature mismatch".to_owned()))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{compute_signature, verify_signature};

    const SECRET: &str = "whsec_c2VjcmV0";
    const PAYLOAD: &[u8] = br#"{"event":"email.sent"}"#;

    #[test]
    fn signatures_carry_the_scheme_prefix_and_a_full_digest() {
        let signature = compute_signature(SECRET, PAYLOAD).unwrap();

        let hex_digest = signature.strip_prefix("sha256=").unwrap();
        assert_eq!(hex_digest.len(), 64);
        assert!(hex_digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic() {
        assert_eq!(
            compute_signature(SECRET, PAYLOAD).unwrap(),
            compute_signature(SECRET, PAYLOAD).unwrap()
        );
    }

    #[test]
    fn valid_signatures_verify() {
        let signature = compute_signature(SECRET, PAYLOAD).unwrap();

        assert!(verify_signature(SECRET, PAYLOAD, &signature).is_ok());
    }

    #[test]
    fn tampered_payloads_fail_verification() {
        let signature = compute_signature(SECRET, PAYLOAD).unwrap();

        let tampered = br#"{"event":"email.failed"}"#;
        assert!(verify_signature(SECRET, tampered, &signature).is_err());
    }

    #[test]
    fn a_different_secret_fails_verification() {
        let signature = compute_signature(SECRET, PAYLOAD).unwrap();

        assert!(verify_signature("whsec_other", PAYLOAD, &signature).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(verify_signature(SECRET, PAYLOAD, "deadbeef").is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "sha256=not-hex").is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "").is_err());
    }
}
