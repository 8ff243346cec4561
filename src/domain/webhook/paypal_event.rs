//! PayPal webhook event types and their translation into lifecycle events.
//!
//! Only the parts of the payload the lifecycle needs are modelled; the
//! rest of the resource stays as raw JSON and is never looked at.

use serde::Deserialize;

use super::WebhookError;
use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{BillingPeriod, LifecycleEvent, PayloadDigest};

/// PayPal webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalWebhookEvent {
    /// Provider-assigned event id (`WH-...`), stable across redeliveries.
    pub id: String,

    pub event_type: String,

    #[serde(default)]
    pub create_time: Option<String>,

    #[serde(default)]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub resource: serde_json::Value,
}

/// PayPal event types relevant to subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayPalEventType {
    SubscriptionCreated,
    SubscriptionActivated,
    SubscriptionUpdated,
    SubscriptionReactivated,
    SubscriptionSuspended,
    SubscriptionCancelled,
    SubscriptionExpired,
    SubscriptionPaymentFailed,
    PaymentSaleCompleted,
    PaymentSaleDenied,
    PaymentSalePending,
    PaymentSaleRefunded,
    Other(String),
}

impl PayPalEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "BILLING.SUBSCRIPTION.CREATED" => Self::SubscriptionCreated,
            "BILLING.SUBSCRIPTION.ACTIVATED" => Self::SubscriptionActivated,
            "BILLING.SUBSCRIPTION.UPDATED" => Self::SubscriptionUpdated,
            "BILLING.SUBSCRIPTION.RE-ACTIVATED" | "BILLING.SUBSCRIPTION.REACTIVATED" => {
                Self::SubscriptionReactivated
            }
            "BILLING.SUBSCRIPTION.SUSPENDED" => Self::SubscriptionSuspended,
            "BILLING.SUBSCRIPTION.CANCELLED" => Self::SubscriptionCancelled,
            "BILLING.SUBSCRIPTION.EXPIRED" => Self::SubscriptionExpired,
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => Self::SubscriptionPaymentFailed,
            "PAYMENT.SALE.COMPLETED" => Self::PaymentSaleCompleted,
            "PAYMENT.SALE.DENIED" => Self::PaymentSaleDenied,
            "PAYMENT.SALE.PENDING" => Self::PaymentSalePending,
            "PAYMENT.SALE.REFUNDED" => Self::PaymentSaleRefunded,
            other => Self::Other(other.to_string()),
        }
    }

    /// Lifecycle event this type maps to, if any.
    pub fn lifecycle_event(&self) -> Option<LifecycleEvent> {
        match self {
            Self::SubscriptionActivated => Some(LifecycleEvent::ApprovalConfirmed),
            Self::SubscriptionUpdated => Some(LifecycleEvent::PeriodRenewed),
            Self::SubscriptionReactivated => Some(LifecycleEvent::Reactivated),
            Self::SubscriptionSuspended => Some(LifecycleEvent::ProviderSuspended),
            Self::SubscriptionCancelled => Some(LifecycleEvent::ProviderCancelled),
            Self::SubscriptionExpired => Some(LifecycleEvent::ProviderExpired),
            _ => None,
        }
    }
}

/// Subscription resource as PayPal sends it in webhooks and detail reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionResource {
    pub id: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub plan_id: Option<String>,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub status_update_time: Option<String>,

    #[serde(default)]
    pub status_change_note: Option<String>,

    #[serde(default)]
    pub billing_info: Option<BillingInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingInfo {
    #[serde(default)]
    pub next_billing_time: Option<String>,

    #[serde(default)]
    pub last_payment: Option<LastPayment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastPayment {
    #[serde(default)]
    pub time: Option<String>,
}

impl SubscriptionResource {
    /// Billing period implied by the last payment and next billing time.
    ///
    /// Falls back to `start_time` for the start when no payment is recorded.
    pub fn billing_period(&self) -> Option<BillingPeriod> {
        let info = self.billing_info.as_ref()?;
        let end = info
            .next_billing_time
            .as_deref()
            .and_then(Timestamp::parse_rfc3339)?;
        let start = info
            .last_payment
            .as_ref()
            .and_then(|p| p.time.as_deref())
            .or(self.start_time.as_deref())
            .and_then(Timestamp::parse_rfc3339)?;
        (!end.is_before(&start)).then(|| BillingPeriod::new(start, end))
    }

    pub fn status_updated_at(&self) -> Option<Timestamp> {
        self.status_update_time
            .as_deref()
            .and_then(Timestamp::parse_rfc3339)
    }
}

/// A webhook reduced to what the reconciler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderNotice {
    pub provider_subscription_id: String,
    pub event: LifecycleEvent,
    pub occurred_at: Timestamp,
    pub payload_digest: PayloadDigest,
    pub period: Option<BillingPeriod>,
    pub reason: Option<String>,
}

impl PayPalWebhookEvent {
    /// Parses a raw webhook body.
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(body).map_err(|e| WebhookError::ParseError(e.to_string()))
    }

    pub fn event_type(&self) -> PayPalEventType {
        PayPalEventType::parse(&self.event_type)
    }

    /// Dedup digest derived from the provider event id.
    pub fn digest(&self) -> PayloadDigest {
        PayloadDigest::of_provider_event(&self.id)
    }

    /// Translates the event into the internal vocabulary.
    ///
    /// # Errors
    ///
    /// - `Ignored` for event types with no lifecycle meaning
    /// - `ParseError` / `MissingField` for malformed subscription resources
    pub fn translate(&self, received_at: Timestamp) -> Result<ProviderNotice, WebhookError> {
        let event_type = self.event_type();
        let event = event_type
            .lifecycle_event()
            .ok_or_else(|| WebhookError::Ignored(self.event_type.clone()))?;

        if self.id.trim().is_empty() {
            return Err(WebhookError::MissingField("id"));
        }

        let resource: SubscriptionResource = serde_json::from_value(self.resource.clone())
            .map_err(|e| WebhookError::ParseError(format!("subscription resource: {}", e)))?;
        if resource.id.trim().is_empty() {
            return Err(WebhookError::MissingField("resource.id"));
        }

        let occurred_at = self
            .create_time
            .as_deref()
            .and_then(Timestamp::parse_rfc3339)
            .or_else(|| resource.status_updated_at())
            .unwrap_or(received_at);

        Ok(ProviderNotice {
            provider_subscription_id: resource.id.clone(),
            event,
            occurred_at,
            payload_digest: self.digest(),
            period: resource.billing_period(),
            reason: resource.status_change_note.clone().or_else(|| self.summary.clone()),
        })
    }
}
