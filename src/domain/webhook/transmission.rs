//! PayPal transmission headers and the local shared-secret verifier.
//!
//! PayPal signs `transmission_id|transmission_time|webhook_id|checksum`.
//! The shared-secret verifier applies the same layout with HMAC-SHA256
//! over the hex SHA-256 of the body, for relays that re-sign deliveries.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::WebhookError;
use crate::domain::foundation::Timestamp;

/// Maximum allowed age of a transmission (5 minutes).
const MAX_TRANSMISSION_AGE_SECS: i64 = 300;

/// Maximum allowed clock skew for future transmissions (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

pub const HEADER_TRANSMISSION_ID: &str = "paypal-transmission-id";
pub const HEADER_TRANSMISSION_TIME: &str = "paypal-transmission-time";
pub const HEADER_TRANSMISSION_SIG: &str = "paypal-transmission-sig";
pub const HEADER_CERT_URL: &str = "paypal-cert-url";
pub const HEADER_AUTH_ALGO: &str = "paypal-auth-algo";

/// Transport headers PayPal sends with every webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionHeaders {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: Option<String>,
    pub auth_algo: Option<String>,
}

impl TransmissionHeaders {
    /// Collects the headers through a case-insensitive lookup.
    ///
    /// # Errors
    ///
    /// `MissingHeader` when id, time or signature is absent or blank.
    pub fn from_lookup<'a>(
        lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<Self, WebhookError> {
        let required = |name: &'static str| {
            lookup(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(WebhookError::MissingHeader(name))
        };
        let optional = |name: &str| lookup(name).map(|v| v.trim().to_string());

        Ok(Self {
            transmission_id: required(HEADER_TRANSMISSION_ID)?,
            transmission_time: required(HEADER_TRANSMISSION_TIME)?,
            transmission_sig: required(HEADER_TRANSMISSION_SIG)?,
            cert_url: optional(HEADER_CERT_URL),
            auth_algo: optional(HEADER_AUTH_ALGO),
        })
    }

    /// Parsed transmission time.
    ///
    /// An unreadable time is part of an unauthenticated header set, so it
    /// fails as `InvalidSignature`.
    pub fn transmitted_at(&self) -> Result<Timestamp, WebhookError> {
        Timestamp::parse_rfc3339(&self.transmission_time).ok_or(WebhookError::InvalidSignature)
    }
}

/// HMAC-SHA256 verifier keyed with a secret shared with the sender.
pub struct SharedSecretVerifier {
    secret: SecretString,
    webhook_id: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: SecretString, webhook_id: impl Into<String>) -> Self {
        Self {
            secret,
            webhook_id: webhook_id.into(),
        }
    }

    /// Verifies the transmission window and signature.
    ///
    /// # Errors
    ///
    /// - `TimestampOutOfRange` - transmission older than 5 minutes or too far ahead
    /// - `InvalidSignature` - unparseable transmission time, signature
    ///   mismatch or signature not hex
    pub fn verify(
        &self,
        headers: &TransmissionHeaders,
        body: &[u8],
        now: Timestamp,
    ) -> Result<(), WebhookError> {
        let sent_at = headers.transmitted_at()?;
        let age = now.duration_since(&sent_at).num_seconds();
        if age > MAX_TRANSMISSION_AGE_SECS || age < -MAX_CLOCK_SKEW_SECS {
            return Err(WebhookError::TimestampOutOfRange);
        }

        let provided = hex::decode(&headers.transmission_sig)
            .map_err(|_| WebhookError::InvalidSignature)?;
        let expected = self.compute_signature(headers, body)?;

        if !constant_time_compare(&expected, &provided) {
            return Err(WebhookError::InvalidSignature);
        }
        Ok(())
    }

    fn compute_signature(
        &self,
        headers: &TransmissionHeaders,
        body: &[u8],
    ) -> Result<Vec<u8>, WebhookError> {
        let message = signed_message(headers, &self.webhook_id, body);
        hmac_sha256(self.secret.expose_secret().as_bytes(), &message)
    }
}

fn hmac_sha256(key: &[u8], message: &str) -> Result<Vec<u8>, WebhookError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signed_message(headers: &TransmissionHeaders, webhook_id: &str, body: &[u8]) -> String {
    format!(
        "{}|{}|{}|{}",
        headers.transmission_id,
        headers.transmission_time,
        webhook_id,
        hex::encode(Sha256::digest(body))
    )
}

/// Constant-time byte comparison.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Signs a delivery the way `SharedSecretVerifier` expects. Used by tests
/// and by relays in front of this service.
pub fn sign_transmission(
    secret: &str,
    webhook_id: &str,
    transmission_id: &str,
    transmission_time: &str,
    body: &[u8],
) -> Result<String, WebhookError> {
    let headers = TransmissionHeaders {
        transmission_id: transmission_id.to_string(),
        transmission_time: transmission_time.to_string(),
        transmission_sig: String::new(),
        cert_url: None,
        auth_algo: None,
    };
    let message = signed_message(&headers, webhook_id, body);
    hmac_sha256(secret.as_bytes(), &message).map(hex::encode)
}
