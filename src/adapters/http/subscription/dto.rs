//! HTTP DTOs (Data Transfer Objects) for subscription endpoints.
//!
//! These types define the JSON request/response structure for the subscription API.
//! They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};

use crate::application::handlers::subscription::{
    CheckEntitlementResult, CommitOutcome, ReconcileResult, SubscribeResult, WebhookOutcome,
};
use crate::domain::subscription::{
    Entitlement, EventSource, NotEntitledReason, Subscription, SubscriptionEvent,
    SubscriptionStatus,
};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    /// PayPal billing plan id (`P-...`).
    pub plan_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

/// Body of cancel, suspend and reactivate requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionActionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query string of the history endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub limit: Option<u32>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription record as returned to the subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub provider_subscription_id: Option<String>,
    /// ISO 8601.
    pub current_period_start: String,
    /// ISO 8601.
    pub current_period_end: String,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspension_reason: Option<String>,
    pub version: u64,
    pub updated_at: String,
}

impl From<Subscription> for SubscriptionView {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            plan_id: sub.plan_id,
            status: sub.status,
            provider_subscription_id: sub.provider_subscription_id,
            current_period_start: sub.current_period_start.to_rfc3339(),
            current_period_end: sub.current_period_end.to_rfc3339(),
            cancel_at_period_end: sub.cancel_at_period_end,
            cancellation_reason: sub.metadata.cancellation_reason,
            suspension_reason: sub.metadata.suspension_reason,
            version: sub.version,
            updated_at: sub.updated_at.to_rfc3339(),
        }
    }
}

/// Response for the current subscription; `subscription` is null when none exists.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<SubscriptionView>,
}

/// Response to a successful subscribe.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeResponse {
    pub subscription: SubscriptionView,
    /// Where to send the subscriber to approve the payment.
    pub approval_url: Option<String>,
}

impl From<SubscribeResult> for SubscribeResponse {
    fn from(result: SubscribeResult) -> Self {
        Self {
            subscription: result.subscription.into(),
            approval_url: result.approval_url,
        }
    }
}

/// Response to cancel, suspend and reactivate.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub subscription: SubscriptionView,
    /// False when the record already was in the requested state.
    pub changed: bool,
}

impl From<CommitOutcome> for ActionResponse {
    fn from(outcome: CommitOutcome) -> Self {
        Self {
            changed: outcome.is_applied(),
            subscription: outcome.into_subscription().into(),
        }
    }
}

impl From<ReconcileResult> for ActionResponse {
    fn from(result: ReconcileResult) -> Self {
        Self {
            changed: result.changed,
            subscription: result.subscription.into(),
        }
    }
}

/// Response of the entitlement check.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementResponse {
    pub entitled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotEntitledReason>,
    pub status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_until: Option<String>,
}

impl From<CheckEntitlementResult> for EntitlementResponse {
    fn from(result: CheckEntitlementResult) -> Self {
        let reason = match result.entitlement {
            Entitlement::Entitled => None,
            Entitlement::NotEntitled(reason) => Some(reason),
        };
        Self {
            entitled: result.entitlement.is_entitled(),
            reason,
            status: result.status,
            access_until: result.access_until.map(|t| t.to_rfc3339()),
        }
    }
}

/// One audit log row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub subscription_id: String,
    pub event_type: String,
    pub source: EventSource,
    pub resulting_status: SubscriptionStatus,
    pub occurred_at: String,
    pub recorded_at: String,
}

impl From<SubscriptionEvent> for HistoryEntry {
    fn from(event: SubscriptionEvent) -> Self {
        Self {
            subscription_id: event.subscription_id.to_string(),
            event_type: event.event_type,
            source: event.source,
            resulting_status: event.resulting_status,
            occurred_at: event.occurred_at.to_rfc3339(),
            recorded_at: event.recorded_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub events: Vec<HistoryEntry>,
}

/// Acknowledgement sent to PayPal.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub outcome: &'static str,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            outcome: outcome.as_str(),
        }
    }
}

/// Standard error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// One of the fixed subscriber-facing messages.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
