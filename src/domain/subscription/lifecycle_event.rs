//! Internal lifecycle event vocabulary.
//!
//! Every change source (user actions, provider webhooks, reconciliation
//! reads) is translated into one of these variants before it reaches the
//! reconciler. Provider-shaped payloads never cross this boundary.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::{PayloadDigest, SubscriptionStatus};
use crate::domain::foundation::Timestamp;

/// A change that may move a subscription between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    ApprovalConfirmed,
    CancelRequested,
    ProviderCancelled,
    SuspendRequested,
    ProviderSuspended,
    Reactivated,
    PeriodElapsed,
    ProviderExpired,
    /// Provider advanced the billing period of an active subscription.
    PeriodRenewed,
    /// Subscriber left the approval flow without approving at the provider.
    ApprovalAbandoned,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 10] = [
        LifecycleEvent::ApprovalConfirmed,
        LifecycleEvent::CancelRequested,
        LifecycleEvent::ProviderCancelled,
        LifecycleEvent::SuspendRequested,
        LifecycleEvent::ProviderSuspended,
        LifecycleEvent::Reactivated,
        LifecycleEvent::PeriodElapsed,
        LifecycleEvent::ProviderExpired,
        LifecycleEvent::PeriodRenewed,
        LifecycleEvent::ApprovalAbandoned,
    ];

    /// Status a record lands in when this event is applied.
    pub fn target_status(&self) -> SubscriptionStatus {
        use LifecycleEvent::*;
        match self {
            ApprovalConfirmed | Reactivated | PeriodRenewed => SubscriptionStatus::Active,
            CancelRequested => SubscriptionStatus::Cancelling,
            ProviderCancelled | PeriodElapsed => SubscriptionStatus::Cancelled,
            SuspendRequested | ProviderSuspended => SubscriptionStatus::Suspended,
            ProviderExpired | ApprovalAbandoned => SubscriptionStatus::Expired,
        }
    }

    /// Source states from which this event is a legal transition.
    pub fn allowed_from(&self) -> &'static [SubscriptionStatus] {
        use LifecycleEvent::*;
        use SubscriptionStatus as S;
        match self {
            ApprovalConfirmed => &[S::PendingApproval],
            CancelRequested => &[S::Active, S::Suspended],
            ProviderCancelled => &[S::Cancelling, S::Active, S::Suspended],
            SuspendRequested | ProviderSuspended => &[S::Active],
            Reactivated => &[S::Suspended],
            PeriodElapsed => &[S::Cancelling],
            ProviderExpired => &[S::PendingApproval, S::Active, S::Suspended, S::Cancelling],
            PeriodRenewed => &[S::Active],
            ApprovalAbandoned => &[S::PendingApproval],
        }
    }

    /// Name recorded as `event_type` in the audit log.
    pub fn as_str(&self) -> &'static str {
        use LifecycleEvent::*;
        match self {
            ApprovalConfirmed => "approval_confirmed",
            CancelRequested => "cancel_requested",
            ProviderCancelled => "provider_cancelled",
            SuspendRequested => "suspend_requested",
            ProviderSuspended => "provider_suspended",
            Reactivated => "reactivated",
            PeriodElapsed => "period_elapsed",
            ProviderExpired => "provider_expired",
            PeriodRenewed => "period_renewed",
            ApprovalAbandoned => "approval_abandoned",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    UserAction,
    Webhook,
    ReconciliationRead,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::UserAction => "user_action",
            EventSource::Webhook => "webhook",
            EventSource::ReconciliationRead => "reconciliation_read",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_action" => Some(EventSource::UserAction),
            "webhook" => Some(EventSource::Webhook),
            "reconciliation_read" => Some(EventSource::ReconciliationRead),
            _ => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing cycle bounds reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BillingPeriod {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }
}

/// A lifecycle event together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub event: LifecycleEvent,
    pub source: EventSource,
    /// Time reported by the source (provider create_time, user click time).
    pub occurred_at: Timestamp,
    /// Server-assigned tie breaker for events with equal `occurred_at`.
    pub arrival_seq: u64,
    pub payload_digest: PayloadDigest,
    pub period: Option<BillingPeriod>,
    pub reason: Option<String>,
}

impl IncomingEvent {
    pub fn new(
        event: LifecycleEvent,
        source: EventSource,
        occurred_at: Timestamp,
        payload_digest: PayloadDigest,
    ) -> Self {
        Self {
            event,
            source,
            occurred_at,
            arrival_seq: 0,
            payload_digest,
            period: None,
            reason: None,
        }
    }

    /// A user-initiated event with a fresh digest.
    pub fn user_action(event: LifecycleEvent, occurred_at: Timestamp) -> Self {
        Self::new(event, EventSource::UserAction, occurred_at, PayloadDigest::random())
    }

    pub fn with_arrival_seq(mut self, seq: u64) -> Self {
        self.arrival_seq = seq;
        self
    }

    pub fn with_period(mut self, period: Option<BillingPeriod>) -> Self {
        self.period = period;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|r| !r.trim().is_empty());
        self
    }

    /// True for events derived from the record and the clock rather than
    /// delivered by a source, which therefore cannot arrive late.
    pub fn is_clock_driven(&self) -> bool {
        self.event == LifecycleEvent::PeriodElapsed
    }

    /// Ordering key used when several events for one record are applied together.
    pub fn ordering_key(&self) -> (Timestamp, u64) {
        (self.occurred_at, self.arrival_seq)
    }

    /// Compares two events by `(occurred_at, arrival_seq)`.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::StateMachine;

    #[test]
    fn every_allowed_edge_is_a_state_machine_edge() {
        for event in LifecycleEvent::ALL {
            for from in event.allowed_from() {
                let target = event.target_status();
                if *from == target {
                    // Renewal keeps the record active.
                    assert_eq!(event, LifecycleEvent::PeriodRenewed);
                    continue;
                }
                assert!(
                    from.can_transition_to(&target),
                    "{:?} from {:?} to {:?}",
                    event,
                    from,
                    target
                );
            }
        }
    }

    #[test]
    fn no_event_is_allowed_from_a_terminal_state() {
        for event in LifecycleEvent::ALL {
            assert!(!event.allowed_from().contains(&SubscriptionStatus::Cancelled));
            assert!(!event.allowed_from().contains(&SubscriptionStatus::Expired));
        }
    }

    #[test]
    fn provider_expired_is_allowed_from_every_non_terminal_state() {
        for status in SubscriptionStatus::NON_TERMINAL {
            assert!(LifecycleEvent::ProviderExpired.allowed_from().contains(&status));
        }
    }

    #[test]
    fn source_parses_its_own_string_form() {
        for source in [
            EventSource::UserAction,
            EventSource::Webhook,
            EventSource::ReconciliationRead,
        ] {
            assert_eq!(EventSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(EventSource::parse("cron"), None);
    }

    #[test]
    fn ordering_uses_arrival_seq_as_tie_breaker() {
        let at = Timestamp::from_unix_secs(1_000).unwrap();
        let first = IncomingEvent::user_action(LifecycleEvent::CancelRequested, at).with_arrival_seq(1);
        let second = IncomingEvent::user_action(LifecycleEvent::SuspendRequested, at).with_arrival_seq(2);
        let earlier = IncomingEvent::user_action(LifecycleEvent::Reactivated, at.add_secs(-1))
            .with_arrival_seq(9);

        let mut events = vec![second.clone(), first.clone(), earlier.clone()];
        events.sort_by(IncomingEvent::cmp_order);
        assert_eq!(events, vec![earlier, first, second]);
    }

    #[test]
    fn blank_reason_is_dropped() {
        let at = Timestamp::now();
        let event = IncomingEvent::user_action(LifecycleEvent::CancelRequested, at)
            .with_reason(Some("  ".to_string()));
        assert_eq!(event.reason, None);
    }
}
