//! AbandonSignupHandler - Closes a signup the subscriber never approved.
//!
//! Reached from the provider's cancel return URL and from `SubscribeHandler`
//! when the caller still holds a `pending_approval` record.
//!
//! 1. Read the provider's view of the pending subscription
//! 2. Still `APPROVAL_PENDING` (or unknown to the provider): expire it locally
//! 3. Anything else: apply the provider's state like a reconciliation read
//!
//! When the provider cannot be reached, the record is only expired once the
//! approval window has passed.

use std::sync::Arc;

use chrono::Duration;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    Decision, IncomingEvent, LifecycleEvent, Subscription, SubscriptionError, SubscriptionStatus,
};
use crate::ports::{GatewayErrorKind, PaymentGateway, SubscriptionRepository};

use super::commit::TransitionCommitter;
use super::reconcile::{ReconcileResult, ReconcileSubscriptionHandler};

/// Provider status of a subscription the subscriber has not approved yet.
const APPROVAL_PENDING: &str = "APPROVAL_PENDING";

/// How long a signup may wait for approval before it is expired without
/// asking the provider.
pub const DEFAULT_APPROVAL_WINDOW_MINUTES: i64 = 180;

/// Command to abandon the caller's pending signup.
#[derive(Debug, Clone)]
pub struct AbandonSignupCommand {
    pub user_id: UserId,
}

/// Where a pending signup ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SignupSettlement {
    /// The record is terminal; the user is free to subscribe again.
    Closed(Subscription),
    /// The provider still considers the subscription live.
    StillLive(Subscription),
}

impl SignupSettlement {
    fn from_record(subscription: Subscription) -> Self {
        if subscription.is_terminal() {
            SignupSettlement::Closed(subscription)
        } else {
            SignupSettlement::StillLive(subscription)
        }
    }

    pub(crate) fn into_subscription(self) -> Subscription {
        match self {
            SignupSettlement::Closed(s) | SignupSettlement::StillLive(s) => s,
        }
    }
}

/// Handler for abandoned signups.
pub struct AbandonSignupHandler {
    repository: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    committer: Arc<TransitionCommitter>,
    reconcile: ReconcileSubscriptionHandler,
    approval_window: Duration,
}

impl AbandonSignupHandler {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        committer: Arc<TransitionCommitter>,
    ) -> Self {
        Self {
            reconcile: ReconcileSubscriptionHandler::new(
                repository.clone(),
                gateway.clone(),
                committer.clone(),
            ),
            repository,
            gateway,
            committer,
            approval_window: Duration::minutes(DEFAULT_APPROVAL_WINDOW_MINUTES),
        }
    }

    pub fn with_approval_window(mut self, window: Duration) -> Self {
        self.approval_window = window;
        self
    }

    /// Abandons the caller's pending signup. A user without a live record
    /// gets their latest record back unchanged.
    pub async fn handle(
        &self,
        cmd: AbandonSignupCommand,
    ) -> Result<ReconcileResult, SubscriptionError> {
        let current = match self.repository.find_live_by_user(&cmd.user_id).await? {
            Some(live) => live,
            None => {
                let latest = self
                    .repository
                    .find_latest_by_user(&cmd.user_id)
                    .await?
                    .ok_or_else(|| {
                        SubscriptionError::not_found(format!("subscription for {}", cmd.user_id))
                    })?;
                return Ok(ReconcileResult {
                    subscription: latest,
                    changed: false,
                });
            }
        };

        let before = current.version;
        let subscription = self.settle(current).await?.into_subscription();
        Ok(ReconcileResult {
            changed: subscription.version != before,
            subscription,
        })
    }

    /// Brings a `pending_approval` record to a decision.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the record is not awaiting approval, and the
    /// provider error if the provider cannot be read inside the approval
    /// window.
    pub(crate) async fn settle(
        &self,
        current: Subscription,
    ) -> Result<SignupSettlement, SubscriptionError> {
        let now = Timestamp::now();
        let intent = IncomingEvent::user_action(LifecycleEvent::ApprovalAbandoned, now)
            .with_arrival_seq(self.committer.next_arrival());

        if let Decision::Rejected(rejection) =
            self.committer.reconciler().decide(&current, &intent, now)
        {
            tracing::warn!(
                subscription_id = %current.id,
                user_id = %current.user_id,
                status = %current.status,
                error_kind = "InvalidTransition",
                "Only a pending signup can be abandoned"
            );
            return Err(rejection.into());
        }

        let Some(provider_id) = current.provider_subscription_id.clone() else {
            return self.abandon(current, intent, now).await;
        };

        match self.gateway.fetch_detail(&provider_id).await {
            Ok(remote) if remote.status.eq_ignore_ascii_case(APPROVAL_PENDING) => {
                self.abandon(current, intent, now).await
            }
            Ok(remote) => {
                let record = match self.reconcile.apply_remote(current.clone(), &remote).await {
                    Ok(outcome) => outcome.into_subscription(),
                    Err(SubscriptionError::InvalidTransition { .. }) => current,
                    Err(err) => return Err(err),
                };
                tracing::info!(
                    subscription_id = %record.id,
                    provider_status = %remote.status,
                    status = %record.status,
                    "Pending signup already moved at provider"
                );
                Ok(SignupSettlement::from_record(record))
            }
            Err(err) if err.kind == GatewayErrorKind::NotFound => {
                self.abandon(current, intent, now).await
            }
            Err(err) if current.approval_window_passed(self.approval_window, now) => {
                tracing::warn!(
                    subscription_id = %current.id,
                    provider_subscription_id = %provider_id,
                    error = %err,
                    "Provider unreadable; expiring signup past its approval window"
                );
                self.abandon(current, intent, now).await
            }
            Err(err) => {
                tracing::error!(
                    subscription_id = %current.id,
                    provider_subscription_id = %provider_id,
                    error = %err,
                    "Provider read failed"
                );
                Err(err.into())
            }
        }
    }

    async fn abandon(
        &self,
        current: Subscription,
        intent: IncomingEvent,
        now: Timestamp,
    ) -> Result<SignupSettlement, SubscriptionError> {
        let outcome = self.committer.submit(current, intent, now).await?;
        let record = outcome.into_subscription();
        if record.status == SubscriptionStatus::Expired {
            tracing::info!(
                subscription_id = %record.id,
                user_id = %record.user_id,
                version = record.version,
                "Signup abandoned before approval"
            );
        }
        Ok(SignupSettlement::from_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::test_support::{user_id, Fixture};
    use crate::domain::subscription::EventSource;
    use crate::ports::GatewayError;

    fn handler(fx: &Fixture) -> AbandonSignupHandler {
        AbandonSignupHandler::new(fx.repo.clone(), fx.gateway_arc(), fx.committer.clone())
    }

    fn abandon(user: &str) -> AbandonSignupCommand {
        AbandonSignupCommand {
            user_id: user_id(user),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Abandoning
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unapproved_signup_expires_with_audit_event() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;

        let result = handler(&fx).handle(abandon("user-1")).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.subscription.status, SubscriptionStatus::Expired);
        assert_eq!(result.subscription.version, sub.version + 1);
        let events = fx.repo.list_events(&sub.id).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, "approval_abandoned");
        assert_eq!(last.source, EventSource::UserAction);
        assert!(fx.repo.find_live_by_user(&user_id("user-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn signup_unknown_to_provider_expires() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway.remove_remote("I-1");

        let result = handler(&fx).handle(abandon("user-1")).await.unwrap();

        assert_eq!(result.subscription.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn repeated_abandon_returns_expired_record_unchanged() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        let first = handler(&fx).handle(abandon("user-1")).await.unwrap();

        let second = handler(&fx).handle(abandon("user-1")).await.unwrap();

        assert!(!second.changed);
        assert_eq!(second.subscription, first.subscription);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Provider Moved On
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn approval_at_provider_activates_instead() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway.set_remote_status("I-1", "ACTIVE");

        let result = handler(&fx).handle(abandon("user-1")).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn approved_but_not_yet_active_stays_pending() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway.set_remote_status("I-1", "APPROVED");

        let result = handler(&fx).handle(abandon("user-1")).await.unwrap();

        assert!(!result.changed);
        assert_eq!(fx.stored(&sub).await.status, SubscriptionStatus::PendingApproval);
    }

    #[tokio::test]
    async fn active_subscription_cannot_be_abandoned() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;

        let err = handler(&fx).handle(abandon("user-1")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidTransition { .. }));
        assert!(!fx.gateway.was_called("fetch_detail"));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Provider Outage
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn outage_inside_approval_window_keeps_signup() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway
            .set_method_error("fetch_detail", GatewayError::unavailable("503"));

        let err = handler(&fx)
            .with_approval_window(Duration::days(30))
            .handle(abandon("user-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::ProviderUnavailable(_)));
        assert_eq!(fx.stored(&sub).await, sub);
    }

    #[tokio::test]
    async fn outage_past_approval_window_expires_signup() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway
            .set_method_error("fetch_detail", GatewayError::unavailable("503"));

        let result = handler(&fx)
            .with_approval_window(Duration::days(1))
            .handle(abandon("user-1"))
            .await
            .unwrap();

        assert_eq!(result.subscription.status, SubscriptionStatus::Expired);
        assert_eq!(fx.stored(&sub).await.status, SubscriptionStatus::Expired);
    }
}
