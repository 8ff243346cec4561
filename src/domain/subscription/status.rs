//! Subscription status state machine.
//!
//! Defines the local subscription states and the edges allowed between
//! them. `Cancelled` and `Expired` are terminal: they have no outgoing
//! edges and a record in either state is never written again.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created locally, waiting for the subscriber to approve at the provider.
    PendingApproval,

    /// Approved and billing.
    Active,

    /// Paused by the user or the provider. No access.
    Suspended,

    /// Cancel requested. Access continues until the current period ends.
    Cancelling,

    /// Cancelled. No access.
    Cancelled,

    /// Ended by the provider. No access.
    Expired,
}

impl SubscriptionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [SubscriptionStatus; 6] = [
        SubscriptionStatus::PendingApproval,
        SubscriptionStatus::Active,
        SubscriptionStatus::Suspended,
        SubscriptionStatus::Cancelling,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::Expired,
    ];

    /// Statuses that count toward the one-live-record-per-user rule.
    pub const NON_TERMINAL: [SubscriptionStatus; 4] = [
        SubscriptionStatus::PendingApproval,
        SubscriptionStatus::Active,
        SubscriptionStatus::Suspended,
        SubscriptionStatus::Cancelling,
    ];

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::PendingApproval => "pending_approval",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelling => "cancelling",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown subscription status: {}", s))
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From PENDING_APPROVAL
            (PendingApproval, Active)
                | (PendingApproval, Expired)
            // From ACTIVE
                | (Active, Cancelling)
                | (Active, Cancelled)
                | (Active, Suspended)
                | (Active, Expired)
            // From SUSPENDED
                | (Suspended, Cancelling)
                | (Suspended, Cancelled)
                | (Suspended, Active)
                | (Suspended, Expired)
            // From CANCELLING
                | (Cancelling, Cancelled)
                | (Cancelling, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            PendingApproval => vec![Active, Expired],
            Active => vec![Cancelling, Cancelled, Suspended, Expired],
            Suspended => vec![Cancelling, Cancelled, Active, Expired],
            Cancelling => vec![Cancelled, Expired],
            Cancelled => vec![],
            Expired => vec![],
        }
    }
}
