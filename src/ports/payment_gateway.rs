//! Payment gateway port.
//!
//! Isolates every network call to the billing provider. Implementations
//! never leak provider-specific error shapes: every failure is one of the
//! `GatewayErrorKind` variants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{BillingPeriod, SubscriptionError};

/// Port for subscription operations at the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a provider subscription awaiting subscriber approval.
    ///
    /// Not idempotent from the provider's point of view; never retried.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, GatewayError>;

    /// Cancels the provider subscription.
    async fn cancel(&self, provider_subscription_id: &str, reason: &str)
        -> Result<(), GatewayError>;

    /// Suspends the provider subscription.
    async fn suspend(
        &self,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Reactivates a suspended provider subscription.
    async fn reactivate(&self, provider_subscription_id: &str, reason: &str)
        -> Result<(), GatewayError>;

    /// Reads the provider's current view of the subscription.
    async fn fetch_detail(
        &self,
        provider_subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError>;
}

/// Person the subscription is billed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
}

/// Request to create a provider subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    pub subscriber: Subscriber,
    /// Local record id, sent as the provider's `custom_id` and idempotency key.
    pub local_reference: String,
}

/// Result of a successful create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubscription {
    pub provider_subscription_id: String,
    /// Link the subscriber must visit to approve.
    pub approval_url: Option<String>,
    pub status: String,
}

/// Provider's view of a subscription at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub provider_subscription_id: String,
    /// Provider status vocabulary (`APPROVAL_PENDING`, `ACTIVE`, ...).
    pub status: String,
    pub plan_id: Option<String>,
    pub period: Option<BillingPeriod>,
    pub status_updated_at: Option<Timestamp>,
    pub status_change_note: Option<String>,
}

/// Failure categories of gateway operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    /// Credentials refused even after a token refresh.
    AuthenticationFailure,
    /// Network failure or 5xx.
    ProviderUnavailable,
    /// No response in time; the outcome at the provider is unknown.
    Timeout,
    /// Provider refused the request (4xx other than 401).
    Rejected,
    /// Provider has no such subscription.
    NotFound,
}

impl GatewayErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayErrorKind::ProviderUnavailable | GatewayErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorKind::AuthenticationFailure => "authentication_failure",
            GatewayErrorKind::ProviderUnavailable => "provider_unavailable",
            GatewayErrorKind::Timeout => "timeout",
            GatewayErrorKind::Rejected => "rejected",
            GatewayErrorKind::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// Gateway operation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    /// Provider's own error name, for logs only.
    pub provider_code: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::AuthenticationFailure, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::ProviderUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Rejected, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorKind::NotFound, format!("{} not found", resource))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for SubscriptionError {
    fn from(err: GatewayError) -> Self {
        match err.kind {
            GatewayErrorKind::AuthenticationFailure => {
                SubscriptionError::authentication_failure(err.message)
            }
            GatewayErrorKind::ProviderUnavailable => {
                SubscriptionError::provider_unavailable(err.message)
            }
            GatewayErrorKind::Timeout => SubscriptionError::unconfirmed(err.message),
            GatewayErrorKind::Rejected => SubscriptionError::provider_rejected(err.message),
            GatewayErrorKind::NotFound => SubscriptionError::not_found(err.message),
        }
    }
}
