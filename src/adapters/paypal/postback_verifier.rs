//! Webhook verification through PayPal's verify-webhook-signature API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;

use crate::domain::webhook::{TransmissionHeaders, WebhookError};
use crate::ports::WebhookSignatureVerifier;

use super::api_types::{VerifySignatureBody, VerifySignatureResponse};
use super::client::PayPalGateway;

/// Asks PayPal whether a delivery is authentic.
///
/// Fails closed: only `verification_status == "SUCCESS"` passes. When
/// PayPal cannot be reached the delivery is refused as retryable so PayPal
/// redelivers it later.
pub struct PostbackVerifier {
    gateway: Arc<PayPalGateway>,
    webhook_id: String,
}

impl PostbackVerifier {
    pub fn new(gateway: Arc<PayPalGateway>, webhook_id: impl Into<String>) -> Self {
        Self {
            gateway,
            webhook_id: webhook_id.into(),
        }
    }
}

#[async_trait]
impl WebhookSignatureVerifier for PostbackVerifier {
    async fn verify(
        &self,
        headers: &TransmissionHeaders,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let cert_url = headers
            .cert_url
            .as_deref()
            .ok_or(WebhookError::MissingHeader("paypal-cert-url"))?;
        let auth_algo = headers
            .auth_algo
            .as_deref()
            .ok_or(WebhookError::MissingHeader("paypal-auth-algo"))?;

        // PayPal wants the event echoed back as JSON, not as a string.
        let webhook_event: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        let request = VerifySignatureBody {
            auth_algo,
            cert_url,
            transmission_id: &headers.transmission_id,
            transmission_sig: &headers.transmission_sig,
            transmission_time: &headers.transmission_time,
            webhook_id: &self.webhook_id,
            webhook_event,
        };

        let token = self
            .gateway
            .access_token()
            .await
            .map_err(|e| WebhookError::VerifierUnavailable(e.to_string()))?;

        let url = format!(
            "{}/v1/notifications/verify-webhook-signature",
            self.gateway.config().api_base_url()
        );
        let response = self
            .gateway
            .http_client()
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| WebhookError::VerifierUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
            return Err(WebhookError::VerifierUnavailable(format!(
                "verification endpoint returned {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            tracing::warn!(status = %status, "PayPal refused verification request");
            return Err(WebhookError::InvalidSignature);
        }

        let outcome: VerifySignatureResponse = response
            .json()
            .await
            .map_err(|e| WebhookError::VerifierUnavailable(e.to_string()))?;

        if outcome.verification_status == "SUCCESS" {
            Ok(())
        } else {
            tracing::warn!(
                transmission_id = %headers.transmission_id,
                verification_status = %outcome.verification_status,
                "PayPal webhook signature rejected"
            );
            Err(WebhookError::InvalidSignature)
        }
    }
}
