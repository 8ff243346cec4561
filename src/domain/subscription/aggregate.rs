//! Subscription record.
//!
//! The local projection of a subscription object owned by the payment
//! provider. The row is only ever written through a compare-and-swap on
//! `version`; every accepted change appends one audit event.
//!
//! # Invariants
//!
//! - At most one non-terminal record per user (enforced by the store)
//! - `provider_subscription_id` never changes once set
//! - `version` only grows, by exactly one per accepted write
//! - `current_period_start <= current_period_end`
//! - `last_event_at` never moves backwards

use serde::{Deserialize, Serialize};

use super::{EventSource, SubscriptionStatus};
use crate::domain::foundation::{
    DomainError, ErrorCode, StateMachine, SubscriptionId, Timestamp, UserId,
};

/// Free-form context recorded alongside status changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<EventSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_by: Option<EventSource>,

    /// Provider approval link handed to the subscriber during signup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
}

/// Local subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: String,

    /// Assigned by the provider once the create call succeeds.
    pub provider_subscription_id: Option<String>,

    pub status: SubscriptionStatus,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
    pub version: u64,
    pub metadata: SubscriptionMetadata,

    /// `occurred_at` of the newest lifecycle event applied to the record.
    #[serde(default)]
    pub last_event_at: Option<Timestamp>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Version of a freshly inserted record.
    pub const INITIAL_VERSION: u64 = 1;

    /// Creates a record awaiting provider approval.
    ///
    /// The billing period is empty until the provider confirms approval.
    pub fn new_pending(user_id: UserId, plan_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: SubscriptionId::new(),
            user_id,
            plan_id: plan_id.into(),
            provider_subscription_id: None,
            status: SubscriptionStatus::PendingApproval,
            current_period_start: now,
            current_period_end: now,
            cancel_at_period_end: false,
            version: Self::INITIAL_VERSION,
            metadata: SubscriptionMetadata::default(),
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True once `now` has reached the end of the current period.
    pub fn period_elapsed(&self, now: Timestamp) -> bool {
        !now.is_before(&self.current_period_end)
    }

    /// True for a pending record whose provider create call never completed.
    pub fn is_abandoned_signup(&self) -> bool {
        self.status == SubscriptionStatus::PendingApproval && self.provider_subscription_id.is_none()
    }

    /// True for a pending record created at least `window` before `now`.
    pub fn approval_window_passed(&self, window: chrono::Duration, now: Timestamp) -> bool {
        self.status == SubscriptionStatus::PendingApproval
            && !now.is_before(&Timestamp::from_datetime(*self.created_at.as_datetime() + window))
    }

    /// True if an event that occurred at `occurred_at` is older than the
    /// newest one already applied.
    pub fn supersedes(&self, occurred_at: Timestamp) -> bool {
        self.last_event_at
            .is_some_and(|last| occurred_at.is_before(&last))
    }

    /// Returns the next version of this record with the provider id attached.
    ///
    /// # Errors
    ///
    /// `ProviderIdImmutable` if a different id is already set, and
    /// `InvalidStateTransition` if the record is terminal.
    pub fn with_provider_subscription(
        &self,
        provider_subscription_id: impl Into<String>,
        approval_url: Option<String>,
        now: Timestamp,
    ) -> Result<Subscription, DomainError> {
        let provider_subscription_id = provider_subscription_id.into();
        if self.is_terminal() {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Cannot link provider subscription to {} record", self.status),
            ));
        }
        if let Some(existing) = &self.provider_subscription_id {
            if *existing != provider_subscription_id {
                return Err(DomainError::new(
                    ErrorCode::ProviderIdImmutable,
                    "Provider subscription id is already set",
                )
                .with_detail("existing", existing.clone())
                .with_detail("attempted", provider_subscription_id));
            }
        }

        let mut next = self.clone();
        next.provider_subscription_id = Some(provider_subscription_id);
        if approval_url.is_some() {
            next.metadata.approval_url = approval_url;
        }
        next.version = self.version + 1;
        next.updated_at = now;
        Ok(next)
    }
}
