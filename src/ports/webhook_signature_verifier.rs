//! Webhook signature verification port.

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;
use crate::domain::webhook::{SharedSecretVerifier, TransmissionHeaders, WebhookError};

/// Decides whether a delivery genuinely came from the provider.
///
/// Implementations fail closed: anything other than a positive
/// verification is an error.
#[async_trait]
pub trait WebhookSignatureVerifier: Send + Sync {
    /// # Errors
    ///
    /// - `InvalidSignature` / `TimestampOutOfRange` - delivery not authentic
    /// - `VerifierUnavailable` - verification could not be completed
    async fn verify(
        &self,
        headers: &TransmissionHeaders,
        body: &[u8],
    ) -> Result<(), WebhookError>;
}

#[async_trait]
impl WebhookSignatureVerifier for SharedSecretVerifier {
    async fn verify(
        &self,
        headers: &TransmissionHeaders,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        SharedSecretVerifier::verify(self, headers, body, Timestamp::now())
    }
}
