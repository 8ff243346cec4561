//! PayPal credentials and webhook verification settings.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::paypal::{PayPalConfig, PayPalMode, RetryPolicy};

const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalSettings {
    pub client_id: String,

    pub client_secret: SecretString,

    #[serde(default = "default_mode")]
    pub mode: PayPalMode,

    /// Overrides the base URL implied by `mode`
    pub api_base_url: Option<String>,

    /// Id of the webhook registered in the PayPal dashboard
    pub webhook_id: String,

    #[serde(default = "default_brand_name")]
    pub brand_name: String,

    pub return_url: String,

    pub cancel_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries for idempotent calls only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub verification: VerificationStrategy,

    /// Required when `verification = shared_secret`
    pub webhook_shared_secret: Option<SecretString>,
}

/// How incoming webhook deliveries are authenticated.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStrategy {
    /// Ask PayPal's verify-webhook-signature endpoint.
    #[default]
    Postback,
    /// Local HMAC check, for relays and local development.
    SharedSecret,
}

impl PayPalSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Gateway configuration for [`crate::adapters::paypal::PayPalGateway`].
    pub fn gateway_config(&self) -> PayPalConfig {
        let config = PayPalConfig::new(&self.client_id, self.client_secret.clone(), self.mode)
            .with_brand_name(&self.brand_name)
            .with_return_urls(&self.return_url, &self.cancel_url)
            .with_request_timeout(self.request_timeout())
            .with_retry_policy(RetryPolicy::with_max_retries(self.max_retries));

        match &self.api_base_url {
            Some(url) => config.with_base_url(url),
            None => config,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__CLIENT_ID"));
        }
        if self.client_secret.expose_secret().trim().is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__CLIENT_SECRET"));
        }
        if self.webhook_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__WEBHOOK_ID"));
        }
        if !is_http_url(&self.return_url) {
            return Err(ValidationError::InvalidUrl("PAYPAL__RETURN_URL"));
        }
        if !is_http_url(&self.cancel_url) {
            return Err(ValidationError::InvalidUrl("PAYPAL__CANCEL_URL"));
        }
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(ValidationError::InvalidUrl("PAYPAL__API_BASE_URL"));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ValidationError::TooManyRetries);
        }
        if self.verification == VerificationStrategy::SharedSecret {
            if self.mode == PayPalMode::Live {
                return Err(ValidationError::SharedSecretWithLiveMode);
            }
            let secret_present = self
                .webhook_shared_secret
                .as_ref()
                .is_some_and(|s| !s.expose_secret().is_empty());
            if !secret_present {
                return Err(ValidationError::MissingRequired(
                    "PAYPAL__WEBHOOK_SHARED_SECRET",
                ));
            }
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn default_mode() -> PayPalMode {
    PayPalMode::Sandbox
}

fn default_brand_name() -> String {
    "SoulDream".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}
