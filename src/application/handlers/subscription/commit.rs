//! TransitionCommitter - the only writer of subscription records after creation.
//!
//! Presents an `IncomingEvent` to the `Reconciler` and writes the result
//! through the repository's compare-and-swap. A `StaleWrite` means another
//! writer won the version; the record is re-read and the event decided again,
//! once.
//!
//! While a subscriber's cancel is on its way to the provider, the provider's
//! own cancellation of that subscription (webhook or read) may land first.
//! It is applied as the requested cancellation, so access still runs to the
//! end of the paid period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::domain::subscription::{
    Decision, IncomingEvent, LifecycleEvent, NoOpReason, Reconciler, Subscription,
    SubscriptionError,
};
use crate::ports::SubscriptionRepository;

/// What happened to an event presented to the committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transition was written; carries the new record.
    Applied(Subscription),
    /// Acknowledged without a write; carries the unchanged record.
    NoOp {
        subscription: Subscription,
        reason: NoOpReason,
    },
    /// The event digest was already recorded.
    Duplicate(Subscription),
}

impl CommitOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            CommitOutcome::Applied(s) | CommitOutcome::Duplicate(s) => s,
            CommitOutcome::NoOp { subscription, .. } => subscription,
        }
    }

    pub fn into_subscription(self) -> Subscription {
        match self {
            CommitOutcome::Applied(s) | CommitOutcome::Duplicate(s) => s,
            CommitOutcome::NoOp { subscription, .. } => subscription,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, CommitOutcome::Applied(_))
    }
}

/// Server-assigned arrival order for incoming events.
#[derive(Debug, Default)]
pub struct ArrivalSequence(AtomicU64);

impl ArrivalSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

enum Attempt {
    Done(CommitOutcome),
    Stale,
}

/// Subscriber cancellation sent to the provider but not yet committed.
#[derive(Debug, Clone)]
struct CancelIntent {
    reason: Option<String>,
}

/// Marks a subscriber cancellation as in flight until dropped.
#[must_use]
pub struct CancellationInFlight<'a> {
    committer: &'a TransitionCommitter,
    subscription_id: SubscriptionId,
}

impl Drop for CancellationInFlight<'_> {
    fn drop(&mut self) {
        self.committer
            .cancellations()
            .remove(&self.subscription_id);
    }
}

/// Decides and writes subscription transitions.
pub struct TransitionCommitter {
    repository: Arc<dyn SubscriptionRepository>,
    reconciler: Reconciler,
    arrivals: ArrivalSequence,
    cancellations: Mutex<HashMap<SubscriptionId, CancelIntent>>,
}

impl TransitionCommitter {
    pub fn new(repository: Arc<dyn SubscriptionRepository>, reconciler: Reconciler) -> Self {
        Self {
            repository,
            reconciler,
            arrivals: ArrivalSequence::new(),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a subscriber cancellation about to be sent to the provider.
    ///
    /// Until the guard drops, a provider cancellation of the same record is
    /// applied as `CancelRequested`.
    pub fn begin_cancellation(
        &self,
        subscription_id: SubscriptionId,
        reason: Option<String>,
    ) -> CancellationInFlight<'_> {
        self.cancellations()
            .insert(subscription_id, CancelIntent { reason });
        CancellationInFlight {
            committer: self,
            subscription_id,
        }
    }

    fn cancellations(&self) -> MutexGuard<'_, HashMap<SubscriptionId, CancelIntent>> {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns a provider cancellation racing an in-flight subscriber cancel
    /// into that cancel.
    fn resolve_in_flight(&self, current: &Subscription, incoming: IncomingEvent) -> IncomingEvent {
        if incoming.event != LifecycleEvent::ProviderCancelled {
            return incoming;
        }
        let Some(intent) = self.cancellations().get(&current.id).cloned() else {
            return incoming;
        };

        tracing::info!(
            subscription_id = %current.id,
            source = %incoming.source,
            "Provider cancellation matches subscriber request in flight"
        );
        let reason = intent.reason.or(incoming.reason);
        IncomingEvent {
            event: LifecycleEvent::CancelRequested,
            reason,
            ..incoming
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Next arrival sequence number for events built by callers.
    pub fn next_arrival(&self) -> u64 {
        self.arrivals.next()
    }

    /// Applies `incoming` to `current`.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the event is illegal for the (re-read) record
    /// - `StaleWrite` if the version moved again after the re-read
    /// - `NotFound` if the record disappeared
    /// - `Infrastructure` on store failure
    pub async fn submit(
        &self,
        current: Subscription,
        incoming: IncomingEvent,
        now: Timestamp,
    ) -> Result<CommitOutcome, SubscriptionError> {
        let incoming = self.resolve_in_flight(&current, incoming);
        if let Attempt::Done(outcome) = self.attempt(current.clone(), &incoming, now).await? {
            return Ok(outcome);
        }

        tracing::debug!(
            subscription_id = %current.id,
            event_type = %incoming.event,
            version = current.version,
            "Stale write, re-reading subscription"
        );

        let fresh = self
            .repository
            .find_by_id(&current.id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(current.id.to_string()))?;

        match self.attempt(fresh, &incoming, now).await? {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::Stale => {
                tracing::error!(
                    subscription_id = %current.id,
                    event_type = %incoming.event,
                    "Subscription still stale after re-read"
                );
                Err(SubscriptionError::StaleWrite)
            }
        }
    }

    async fn attempt(
        &self,
        current: Subscription,
        incoming: &IncomingEvent,
        now: Timestamp,
    ) -> Result<Attempt, SubscriptionError> {
        let transition = match self.reconciler.decide(&current, incoming, now) {
            Decision::Apply(transition) => transition,
            Decision::NoOp(reason) => {
                tracing::debug!(
                    subscription_id = %current.id,
                    event_type = %incoming.event,
                    source = %incoming.source,
                    reason = %reason,
                    "Event acknowledged without change"
                );
                return Ok(Attempt::Done(CommitOutcome::NoOp {
                    subscription: current,
                    reason,
                }));
            }
            Decision::Rejected(rejection) => {
                tracing::warn!(
                    subscription_id = %current.id,
                    event_type = %incoming.event,
                    source = %incoming.source,
                    status = %current.status,
                    error_kind = "InvalidTransition",
                    "Transition rejected"
                );
                return Err(rejection.into());
            }
        };

        match self
            .repository
            .commit(&transition.next, current.version, &transition.event)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    subscription_id = %transition.next.id,
                    provider_subscription_id = ?transition.next.provider_subscription_id,
                    event_type = %incoming.event,
                    source = %incoming.source,
                    status = %transition.next.status,
                    version = transition.next.version,
                    "Subscription transition applied"
                );
                Ok(Attempt::Done(CommitOutcome::Applied(transition.next)))
            }
            Err(DomainError {
                code: ErrorCode::DuplicateEvent,
                ..
            }) => {
                tracing::debug!(
                    subscription_id = %current.id,
                    payload_digest = %incoming.payload_digest,
                    "Duplicate event acknowledged"
                );
                Ok(Attempt::Done(CommitOutcome::Duplicate(current)))
            }
            Err(DomainError {
                code: ErrorCode::StaleWrite,
                ..
            }) => Ok(Attempt::Stale),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::domain::foundation::UserId;
    use crate::domain::subscription::{
        EventSource, LifecycleEvent, PayloadDigest, SubscriptionEvent, SubscriptionStatus,
    };
    use crate::ports::SubscriptionRepository;

    async fn seeded(
        repo: &InMemorySubscriptionRepository,
        status: SubscriptionStatus,
    ) -> Subscription {
        let now = Timestamp::now();
        let mut sub = Subscription::new_pending(UserId::new("user-1").unwrap(), "P-PLAN", now);
        sub.provider_subscription_id = Some("I-1".into());
        sub.status = status;
        sub.current_period_end = now.add_days(20);
        sub.cancel_at_period_end = status == SubscriptionStatus::Cancelling;
        let created = SubscriptionEvent::new(
            sub.id,
            "subscription_created",
            now,
            now,
            EventSource::UserAction,
            PayloadDigest::random(),
            sub.status,
            sub.version,
        );
        repo.insert(&sub, &created).await.unwrap();
        sub
    }

    fn webhook(event: LifecycleEvent, digest: &str) -> IncomingEvent {
        IncomingEvent::new(
            event,
            EventSource::Webhook,
            Timestamp::now(),
            PayloadDigest::of_provider_event(digest),
        )
    }

    #[tokio::test]
    async fn applies_legal_transition_and_bumps_version() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        let outcome = committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderSuspended, "WH-1"), Timestamp::now())
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Suspended);
        assert_eq!(stored.version, sub.version + 1);
    }

    #[tokio::test]
    async fn rejection_leaves_record_untouched() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::PendingApproval).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        let err = committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderSuspended, "WH-1"), Timestamp::now())
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidTransition { .. }));
        assert_eq!(repo.find_by_id(&sub.id).await.unwrap().unwrap(), sub);
        assert_eq!(repo.event_count(), 1);
    }

    #[tokio::test]
    async fn replayed_digest_is_acknowledged_as_duplicate() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderSuspended, "WH-1"), Timestamp::now())
            .await
            .unwrap();
        // The copy below still reads active, so only the digest stops the write.
        let mut stale = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        stale.status = SubscriptionStatus::Active;
        let outcome = committer
            .submit(stale, webhook(LifecycleEvent::ProviderSuspended, "WH-1"), Timestamp::now())
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Duplicate(_)));
        assert_eq!(repo.event_count(), 2);
    }

    #[tokio::test]
    async fn stale_write_is_redecided_against_fresh_record() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        // Another writer cancels first.
        committer
            .submit(
                sub.clone(),
                IncomingEvent::user_action(LifecycleEvent::CancelRequested, Timestamp::now()),
                Timestamp::now(),
            )
            .await
            .unwrap();

        // The webhook still holds the old copy; it is retried against `cancelling`.
        let outcome = committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderSuspended, "WH-2"), Timestamp::now())
            .await;

        let err = outcome.unwrap_err();
        assert_eq!(
            err,
            SubscriptionError::invalid_transition("cancelling", "provider_suspended")
        );
        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelling);
        assert_eq!(stored.version, sub.version + 1);
    }

    #[tokio::test]
    async fn stale_retry_can_still_apply() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderSuspended, "WH-1"), Timestamp::now())
            .await
            .unwrap();

        let outcome = committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderCancelled, "WH-2"), Timestamp::now())
            .await
            .unwrap();

        let stored = outcome.into_subscription();
        assert_eq!(stored.status, SubscriptionStatus::Cancelled);
        assert_eq!(stored.version, sub.version + 2);
    }

    #[tokio::test]
    async fn same_state_is_a_noop_without_audit_row() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        let outcome = committer
            .submit(
                sub.clone(),
                IncomingEvent::user_action(LifecycleEvent::Reactivated, Timestamp::now()),
                Timestamp::now(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::NoOp {
                subscription: sub,
                reason: NoOpReason::AlreadyInState
            }
        );
        assert_eq!(repo.event_count(), 1);
    }

    #[tokio::test]
    async fn provider_cancel_racing_subscriber_cancel_keeps_paid_period() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());
        let requested_at = Timestamp::now();

        let in_flight = committer.begin_cancellation(sub.id, Some("moving".into()));
        let provider = IncomingEvent::new(
            LifecycleEvent::ProviderCancelled,
            EventSource::Webhook,
            requested_at.add_secs(10),
            PayloadDigest::of_provider_event("WH-CANCEL"),
        );
        let webhook_outcome = committer
            .submit(sub.clone(), provider, Timestamp::now())
            .await
            .unwrap();
        assert_eq!(webhook_outcome.subscription().status, SubscriptionStatus::Cancelling);

        // The subscriber's own commit arrives second, against its stale copy.
        let own = IncomingEvent::user_action(LifecycleEvent::CancelRequested, requested_at);
        let outcome = committer.submit(sub.clone(), own, Timestamp::now()).await.unwrap();
        drop(in_flight);

        assert!(!outcome.is_applied());
        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelling);
        assert!(stored.cancel_at_period_end);
        assert_eq!(stored.current_period_end, sub.current_period_end);
        assert_eq!(stored.metadata.cancellation_reason.as_deref(), Some("moving"));
    }

    #[tokio::test]
    async fn provider_cancel_without_subscriber_request_ends_immediately() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Active).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());

        drop(committer.begin_cancellation(sub.id, None));
        let outcome = committer
            .submit(sub.clone(), webhook(LifecycleEvent::ProviderCancelled, "WH-9"), Timestamp::now())
            .await
            .unwrap();

        assert_eq!(outcome.subscription().status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn older_delivery_after_newer_one_is_superseded() {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let sub = seeded(&repo, SubscriptionStatus::Suspended).await;
        let committer = TransitionCommitter::new(repo.clone(), Reconciler::default());
        let t = Timestamp::now();

        let reactivated = IncomingEvent::new(
            LifecycleEvent::Reactivated,
            EventSource::Webhook,
            t.add_secs(50),
            PayloadDigest::of_provider_event("WH-REACT"),
        );
        let active = committer
            .submit(sub.clone(), reactivated, Timestamp::now())
            .await
            .unwrap()
            .into_subscription();

        let late_suspend = IncomingEvent::new(
            LifecycleEvent::ProviderSuspended,
            EventSource::Webhook,
            t.add_secs(40),
            PayloadDigest::of_provider_event("WH-SUSP"),
        );
        let outcome = committer
            .submit(active.clone(), late_suspend, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::NoOp {
                subscription: active.clone(),
                reason: NoOpReason::Superseded
            }
        );
        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.version, active.version);
    }

    #[test]
    fn arrival_sequence_increases() {
        let seq = ArrivalSequence::new();
        let first = seq.next();
        assert!(seq.next() > first);
    }
}
