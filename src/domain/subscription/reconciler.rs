//! Reconciler - the only authority on legal subscription transitions.
//!
//! `decide` is a pure function of the current record, one incoming event
//! and the clock. It never touches the network or the store; persisting
//! an applied decision is the caller's job and goes through the store's
//! compare-and-swap on `version`.
//!
//! Delivered events are ordered by `occurred_at`: an event older than the
//! newest one already applied (`last_event_at`) is acknowledged without a
//! write, whatever order the writes reach the store in.

use chrono::Duration;
use std::fmt;

use super::{
    IncomingEvent, LifecycleEvent, Subscription, SubscriptionEvent,
    SubscriptionStatus,
};
use crate::domain::foundation::Timestamp;

/// An accepted transition: the next record and its audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Subscription,
    pub event: SubscriptionEvent,
}

/// Why an event was acknowledged without a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Record is already in the event's target state.
    AlreadyInState,
    /// `PeriodElapsed` arrived before the period end.
    PeriodNotElapsed,
    /// `PeriodRenewed` did not move the period end forward.
    PeriodNotAdvanced,
    /// A newer event was already applied to the record.
    Superseded,
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoOpReason::AlreadyInState => "already_in_state",
            NoOpReason::PeriodNotElapsed => "period_not_elapsed",
            NoOpReason::PeriodNotAdvanced => "period_not_advanced",
            NoOpReason::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// A structurally illegal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub from: SubscriptionStatus,
    pub event: LifecycleEvent,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not allowed while the subscription is {}",
            self.event, self.from
        )
    }
}

/// Outcome of presenting one event to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Apply(Transition),
    NoOp(NoOpReason),
    Rejected(Rejection),
}

impl Decision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected(_))
    }
}

/// Transition rules plus the fallback billing period used when the
/// provider confirms approval without reporting one.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    fallback_period: Duration,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(Duration::days(30))
    }
}

impl Reconciler {
    pub fn new(fallback_period: Duration) -> Self {
        Self { fallback_period }
    }

    /// Decides what `incoming` does to `current` at time `now`.
    pub fn decide(
        &self,
        current: &Subscription,
        incoming: &IncomingEvent,
        now: Timestamp,
    ) -> Decision {
        let event = incoming.event;
        let target = event.target_status();

        if event == LifecycleEvent::PeriodRenewed && current.status == SubscriptionStatus::Active {
            return match incoming.period {
                Some(period) if period.end.is_after(&current.current_period_end) => {
                    Decision::Apply(self.apply(current, incoming, now))
                }
                _ => Decision::NoOp(NoOpReason::PeriodNotAdvanced),
            };
        }

        if current.status == target {
            return Decision::NoOp(NoOpReason::AlreadyInState);
        }

        if !event.allowed_from().contains(&current.status) {
            return Decision::Rejected(Rejection {
                from: current.status,
                event,
            });
        }

        if !incoming.is_clock_driven() && current.supersedes(incoming.occurred_at) {
            return Decision::NoOp(NoOpReason::Superseded);
        }

        if event == LifecycleEvent::PeriodElapsed
            && !(current.cancel_at_period_end && current.period_elapsed(now))
        {
            return Decision::NoOp(NoOpReason::PeriodNotElapsed);
        }

        Decision::Apply(self.apply(current, incoming, now))
    }

    fn apply(&self, current: &Subscription, incoming: &IncomingEvent, now: Timestamp) -> Transition {
        let mut next = current.clone();
        next.status = incoming.event.target_status();
        next.version = current.version + 1;
        next.updated_at = now;
        next.cancel_at_period_end = next.status == SubscriptionStatus::Cancelling;
        next.last_event_at = match current.last_event_at {
            Some(last) if last.is_after(&incoming.occurred_at) => Some(last),
            _ => Some(incoming.occurred_at),
        };

        match (incoming.period, incoming.event) {
            (Some(period), _) => {
                next.current_period_start = period.start;
                next.current_period_end = period.end;
            }
            (None, LifecycleEvent::ApprovalConfirmed) => {
                next.current_period_start = incoming.occurred_at;
                next.current_period_end =
                    Timestamp::from_datetime(*incoming.occurred_at.as_datetime() + self.fallback_period);
            }
            _ => {}
        }

        let reason = incoming.reason.clone();
        match incoming.event {
            LifecycleEvent::CancelRequested | LifecycleEvent::ProviderCancelled => {
                if reason.is_some() || next.metadata.cancellation_reason.is_none() {
                    next.metadata.cancellation_reason = reason;
                }
                if next.metadata.cancelled_by.is_none() {
                    next.metadata.cancelled_by = Some(incoming.source);
                }
            }
            LifecycleEvent::SuspendRequested | LifecycleEvent::ProviderSuspended => {
                next.metadata.suspension_reason = reason;
                next.metadata.suspended_by = Some(incoming.source);
            }
            LifecycleEvent::Reactivated => {
                next.metadata.suspension_reason = None;
                next.metadata.suspended_by = None;
            }
            _ => {}
        }

        let event = SubscriptionEvent::new(
            current.id,
            incoming.event.as_str(),
            incoming.occurred_at,
            now,
            incoming.source,
            incoming.payload_digest.clone(),
            next.status,
            next.version,
        );

        Transition { next, event }
    }
}

/// True when a provider-side cancellation only confirms a cancel this
/// service already requested for a period that is still running.
///
/// The provider ends the subscription immediately on cancel, while the
/// local record keeps entitlement until `current_period_end`.
pub fn confirms_requested_cancellation(current: &Subscription, now: Timestamp) -> bool {
    current.status == SubscriptionStatus::Cancelling
        && current.cancel_at_period_end
        && !current.period_elapsed(now)
}

/// Which events a reconciliation read implies for a provider status string.
///
/// Returns `None` when the provider state carries no change for the
/// local record (e.g. still awaiting approval, or already matching).
pub fn event_for_provider_status(
    provider_status: &str,
    current: &Subscription,
) -> Option<LifecycleEvent> {
    use SubscriptionStatus as S;
    match (provider_status.to_ascii_uppercase().as_str(), current.status) {
        ("ACTIVE", S::PendingApproval) => Some(LifecycleEvent::ApprovalConfirmed),
        ("ACTIVE", S::Suspended) => Some(LifecycleEvent::Reactivated),
        ("ACTIVE", S::Active) => Some(LifecycleEvent::PeriodRenewed),
        ("SUSPENDED", _) => Some(LifecycleEvent::ProviderSuspended),
        ("CANCELLED", S::PendingApproval) => Some(LifecycleEvent::ApprovalAbandoned),
        ("CANCELLED", _) => Some(LifecycleEvent::ProviderCancelled),
        ("EXPIRED", _) => Some(LifecycleEvent::ProviderExpired),
        _ => None,
    }
}
