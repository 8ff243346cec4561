//! Entitlement gate.
//!
//! Answers "does this user currently have paid access" from the local
//! record alone. Never calls the payment provider.

use chrono::Duration;
use serde::Serialize;
use std::fmt;

use super::{Subscription, SubscriptionStatus};
use crate::domain::foundation::Timestamp;

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotEntitledReason {
    NoSubscription,
    AwaitingApproval,
    Suspended,
    PeriodEnded,
    Cancelled,
    Expired,
}

impl fmt::Display for NotEntitledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotEntitledReason::NoSubscription => "no_subscription",
            NotEntitledReason::AwaitingApproval => "awaiting_approval",
            NotEntitledReason::Suspended => "suspended",
            NotEntitledReason::PeriodEnded => "period_ended",
            NotEntitledReason::Cancelled => "cancelled",
            NotEntitledReason::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Result of an entitlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    Entitled,
    NotEntitled(NotEntitledReason),
}

impl Entitlement {
    pub fn is_entitled(&self) -> bool {
        matches!(self, Entitlement::Entitled)
    }
}

/// Pure access check with an optional grace window for records still
/// awaiting provider approval.
#[derive(Debug, Clone, Copy)]
pub struct EntitlementGate {
    pending_grace: Duration,
}

impl Default for EntitlementGate {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl EntitlementGate {
    pub fn new(pending_grace: Duration) -> Self {
        Self { pending_grace }
    }

    /// Builds a gate from a grace window in minutes; zero disables it.
    pub fn with_grace_minutes(minutes: u32) -> Self {
        Self::new(Duration::minutes(i64::from(minutes)))
    }

    pub fn check(&self, subscription: Option<&Subscription>, now: Timestamp) -> Entitlement {
        let Some(subscription) = subscription else {
            return Entitlement::NotEntitled(NotEntitledReason::NoSubscription);
        };

        match subscription.status {
            SubscriptionStatus::Active => Entitlement::Entitled,
            SubscriptionStatus::Cancelling if !subscription.period_elapsed(now) => {
                Entitlement::Entitled
            }
            SubscriptionStatus::Cancelling => {
                Entitlement::NotEntitled(NotEntitledReason::PeriodEnded)
            }
            SubscriptionStatus::PendingApproval => {
                let grace_ends =
                    Timestamp::from_datetime(*subscription.created_at.as_datetime() + self.pending_grace);
                if now.is_before(&grace_ends) {
                    Entitlement::Entitled
                } else {
                    Entitlement::NotEntitled(NotEntitledReason::AwaitingApproval)
                }
            }
            SubscriptionStatus::Suspended => Entitlement::NotEntitled(NotEntitledReason::Suspended),
            SubscriptionStatus::Cancelled => Entitlement::NotEntitled(NotEntitledReason::Cancelled),
            SubscriptionStatus::Expired => Entitlement::NotEntitled(NotEntitledReason::Expired),
        }
    }
}
