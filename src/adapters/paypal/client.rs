//! PayPal Subscriptions REST adapter.
//!
//! Implements `PaymentGateway` against the PayPal v1 billing API.
//!
//! # Authentication
//!
//! OAuth2 client credentials. The access token is cached until shortly
//! before expiry; a 401 from any call drops the cached token and the call
//! is sent once more with a fresh one.
//!
//! # Retries
//!
//! `fetch_detail`, `cancel`, `suspend` and `reactivate` are idempotent at
//! PayPal and go through `retry_idempotent`. `create_subscription` is sent
//! exactly once with a `PayPal-Request-Id` so a caller-side replay cannot
//! create a second subscription.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::ports::{
    CreateSubscriptionRequest, CreatedSubscription, GatewayError, GatewayErrorKind,
    PaymentGateway, RemoteSubscription,
};

use super::api_types::{
    CreateSubscriptionBody, ErrorBody, ReasonBody, SubscriptionResponse, TokenResponse,
};
use super::retry::{retry_idempotent, RetryPolicy};

const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const LIVE_BASE_URL: &str = "https://api-m.paypal.com";

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Issue code PayPal returns when the subscription is already in the
/// state an action would move it to.
const STATUS_INVALID_ISSUE: &str = "SUBSCRIPTION_STATUS_INVALID";

/// PayPal environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayPalMode {
    Sandbox,
    Live,
}

impl PayPalMode {
    pub fn base_url(&self) -> &'static str {
        match self {
            PayPalMode::Sandbox => SANDBOX_BASE_URL,
            PayPalMode::Live => LIVE_BASE_URL,
        }
    }
}

impl std::str::FromStr for PayPalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(PayPalMode::Sandbox),
            "live" => Ok(PayPalMode::Live),
            other => Err(format!("unknown PayPal mode: {}", other)),
        }
    }
}

/// PayPal API configuration.
#[derive(Clone)]
pub struct PayPalConfig {
    client_id: String,
    client_secret: SecretString,
    api_base_url: String,
    brand_name: String,
    return_url: String,
    cancel_url: String,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl PayPalConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        mode: PayPalMode,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            api_base_url: mode.base_url().to_string(),
            brand_name: "SoulDream".to_string(),
            return_url: String::new(),
            cancel_url: String::new(),
            request_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_brand_name(mut self, brand_name: impl Into<String>) -> Self {
        self.brand_name = brand_name.into();
        self
    }

    /// Where PayPal sends the subscriber after approving or abandoning.
    pub fn with_return_urls(
        mut self,
        return_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        self.return_url = return_url.into();
        self.cancel_url = cancel_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// PayPal gateway adapter.
pub struct PayPalGateway {
    config: PayPalConfig,
    http_client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalGateway {
    pub fn new(config: PayPalConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            http_client,
            token: Mutex::new(None),
        }
    }

    /// Shared client for the postback verifier.
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub(crate) fn config(&self) -> &PayPalConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// Returns a valid access token, fetching one if the cache is empty
    /// or about to expire.
    pub(crate) async fn access_token(&self) -> Result<SecretString, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn request_token(&self) -> Result<CachedToken, GatewayError> {
        let response = self
            .http_client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let mut err = error_from_response(response).await;
            // The token endpoint answers bad credentials with 400 or 401.
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                err.kind = GatewayErrorKind::AuthenticationFailure;
            }
            tracing::error!(status = %status, error = %err, "PayPal token request failed");
            return Err(err);
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            GatewayError::unavailable(format!("Failed to parse PayPal token response: {}", e))
        })?;

        tracing::debug!(expires_in = token.expires_in, "Obtained PayPal access token");

        Ok(CachedToken {
            value: SecretString::new(token.access_token),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        request_id: Option<&str>,
        token: &SecretString,
    ) -> Result<Response, GatewayError> {
        let mut request = self
            .http_client
            .request(method.clone(), self.url(path))
            .bearer_auth(token.expose_secret());

        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(request_id) = request_id {
            request = request.header("PayPal-Request-Id", request_id);
        }

        request.send().await.map_err(transport_error)
    }

    /// Sends an authorized request, refreshing the token once on 401.
    ///
    /// Non-success statuses are mapped to `GatewayError`.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        request_id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let token = self.access_token().await?;
        let mut response = self
            .dispatch(&method, path, body, request_id, &token)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(path, "PayPal rejected access token, refreshing");
            self.invalidate_token().await;
            let token = self.access_token().await?;
            response = self
                .dispatch(&method, path, body, request_id, &token)
                .await?;
        }

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn fetch_detail_once(
        &self,
        provider_subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError> {
        let path = format!("/v1/billing/subscriptions/{}", provider_subscription_id);
        let response = self.send(Method::GET, &path, None, None).await?;

        let detail: SubscriptionResponse = response.json().await.map_err(|e| {
            GatewayError::unavailable(format!("Failed to parse PayPal subscription: {}", e))
        })?;

        Ok(detail.into_remote())
    }

    async fn post_action_once(
        &self,
        provider_subscription_id: &str,
        action: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let path = format!(
            "/v1/billing/subscriptions/{}/{}",
            provider_subscription_id, action
        );
        let body = serde_json::to_value(ReasonBody { reason })
            .map_err(|e| GatewayError::rejected(format!("Invalid request body: {}", e)))?;

        self.send(Method::POST, &path, Some(&body), None).await?;
        Ok(())
    }

    /// Runs a state-changing action with retries.
    ///
    /// A `SUBSCRIPTION_STATUS_INVALID` refusal is accepted when PayPal
    /// already reports `settled_status`, which covers a retry whose first
    /// attempt went through.
    async fn post_action(
        &self,
        provider_subscription_id: &str,
        action: &'static str,
        reason: &str,
        settled_status: &str,
    ) -> Result<(), GatewayError> {
        let result = retry_idempotent(&self.config.retry_policy, action, || {
            self.post_action_once(provider_subscription_id, action, reason)
        })
        .await;

        match result {
            Err(err)
                if err.kind == GatewayErrorKind::Rejected
                    && err.provider_code.as_deref() == Some(STATUS_INVALID_ISSUE) =>
            {
                let remote = self.fetch_detail(provider_subscription_id).await?;
                if remote.status.eq_ignore_ascii_case(settled_status) {
                    tracing::info!(
                        provider_subscription_id,
                        action,
                        status = %remote.status,
                        "PayPal subscription already in requested state"
                    );
                    Ok(())
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, GatewayError> {
        let body = CreateSubscriptionBody::from_request(
            &request,
            &self.config.brand_name,
            &self.config.return_url,
            &self.config.cancel_url,
        );
        let body = serde_json::to_value(body)
            .map_err(|e| GatewayError::rejected(format!("Invalid request body: {}", e)))?;

        let response = self
            .send(
                Method::POST,
                "/v1/billing/subscriptions",
                Some(&body),
                Some(&request.local_reference),
            )
            .await
            .map_err(|e| {
                tracing::error!(plan_id = %request.plan_id, error = %e, "PayPal create_subscription failed");
                e
            })?;

        let created: SubscriptionResponse = response.json().await.map_err(|e| {
            GatewayError::unavailable(format!("Failed to parse PayPal subscription: {}", e))
        })?;

        let approval_url = created.approval_url();
        if approval_url.is_none() {
            tracing::warn!(
                provider_subscription_id = %created.resource.id,
                "PayPal subscription created without an approval link"
            );
        }

        Ok(CreatedSubscription {
            status: created.status(),
            approval_url,
            provider_subscription_id: created.resource.id,
        })
    }

    async fn cancel(&self, provider_subscription_id: &str, reason: &str) -> Result<(), GatewayError> {
        self.post_action(provider_subscription_id, "cancel", reason, "CANCELLED")
            .await
    }

    async fn suspend(
        &self,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.post_action(provider_subscription_id, "suspend", reason, "SUSPENDED")
            .await
    }

    async fn reactivate(
        &self,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.post_action(provider_subscription_id, "activate", reason, "ACTIVE")
            .await
    }

    async fn fetch_detail(
        &self,
        provider_subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError> {
        retry_idempotent(&self.config.retry_policy, "fetch_detail", || {
            self.fetch_detail_once(provider_subscription_id)
        })
        .await
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::timeout(format!("PayPal did not respond in time: {}", err))
    } else {
        GatewayError::unavailable(format!("PayPal request failed: {}", err))
    }
}

fn kind_for_status(status: StatusCode) -> GatewayErrorKind {
    match status {
        StatusCode::UNAUTHORIZED => GatewayErrorKind::AuthenticationFailure,
        StatusCode::NOT_FOUND => GatewayErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GatewayErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => GatewayErrorKind::ProviderUnavailable,
        s if s.is_server_error() => GatewayErrorKind::ProviderUnavailable,
        _ => GatewayErrorKind::Rejected,
    }
}

async fn error_from_response(response: Response) -> GatewayError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();

    let err = GatewayError::new(
        kind_for_status(status),
        format!("PayPal returned {}: {}", status.as_u16(), body.describe()),
    );
    match body.code() {
        Some(code) => err.with_provider_code(code),
        None => err,
    }
}
