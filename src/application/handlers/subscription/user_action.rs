//! Shared flow for cancel, suspend and reactivate.
//!
//! 1. Load the caller's live record
//! 2. Ask the reconciler whether the action is legal now (no provider call otherwise)
//! 3. Perform the action at the provider
//! 4. Commit the local transition
//!
//! Nothing is written locally before the provider confirms. A cancel stays
//! registered with the committer from step 3 until step 4 finishes.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    Decision, IncomingEvent, LifecycleEvent, Subscription, SubscriptionError,
};
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::commit::{CommitOutcome, TransitionCommitter};

/// Provider call backing a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderAction {
    Cancel,
    Suspend,
    Reactivate,
}

impl ProviderAction {
    fn lifecycle_event(&self) -> LifecycleEvent {
        match self {
            ProviderAction::Cancel => LifecycleEvent::CancelRequested,
            ProviderAction::Suspend => LifecycleEvent::SuspendRequested,
            ProviderAction::Reactivate => LifecycleEvent::Reactivated,
        }
    }

    /// PayPal requires a non-empty reason on every action.
    fn default_reason(&self) -> &'static str {
        match self {
            ProviderAction::Cancel => "Cancelled by subscriber",
            ProviderAction::Suspend => "Paused by subscriber",
            ProviderAction::Reactivate => "Resumed by subscriber",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ProviderAction::Cancel => "cancel",
            ProviderAction::Suspend => "suspend",
            ProviderAction::Reactivate => "reactivate",
        }
    }

    async fn send(
        &self,
        gateway: &dyn PaymentGateway,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), SubscriptionError> {
        let result = match self {
            ProviderAction::Cancel => gateway.cancel(provider_subscription_id, reason).await,
            ProviderAction::Suspend => gateway.suspend(provider_subscription_id, reason).await,
            ProviderAction::Reactivate => {
                gateway.reactivate(provider_subscription_id, reason).await
            }
        };
        result.map_err(SubscriptionError::from)
    }
}

/// Dependencies shared by the user action handlers.
#[derive(Clone)]
pub(crate) struct UserActionRunner {
    repository: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    committer: Arc<TransitionCommitter>,
}

impl UserActionRunner {
    pub(crate) fn new(
        repository: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        committer: Arc<TransitionCommitter>,
    ) -> Self {
        Self {
            repository,
            gateway,
            committer,
        }
    }

    pub(crate) async fn run(
        &self,
        action: ProviderAction,
        user_id: &UserId,
        reason: Option<String>,
    ) -> Result<CommitOutcome, SubscriptionError> {
        let current = self
            .repository
            .find_live_by_user(user_id)
            .await?
            .ok_or_else(|| SubscriptionError::not_found(format!("live subscription for {}", user_id)))?;

        let now = Timestamp::now();
        let incoming = IncomingEvent::user_action(action.lifecycle_event(), now)
            .with_arrival_seq(self.committer.next_arrival())
            .with_reason(reason);

        match self.committer.reconciler().decide(&current, &incoming, now) {
            Decision::Rejected(rejection) => {
                tracing::warn!(
                    subscription_id = %current.id,
                    user_id = %user_id,
                    action = action.name(),
                    status = %current.status,
                    error_kind = "InvalidTransition",
                    "User action not valid for subscription state"
                );
                return Err(rejection.into());
            }
            Decision::NoOp(reason) => {
                return Ok(CommitOutcome::NoOp {
                    subscription: current,
                    reason,
                });
            }
            Decision::Apply(_) => {}
        }

        let provider_id = provider_id_of(&current)?;
        let provider_reason = incoming
            .reason
            .clone()
            .unwrap_or_else(|| action.default_reason().to_string());

        let _in_flight = (action == ProviderAction::Cancel)
            .then(|| self.committer.begin_cancellation(current.id, incoming.reason.clone()));

        action
            .send(self.gateway.as_ref(), provider_id, &provider_reason)
            .await
            .map_err(|err| {
                if matches!(err, SubscriptionError::Unconfirmed(_)) {
                    tracing::warn!(
                        subscription_id = %current.id,
                        provider_subscription_id = provider_id,
                        action = action.name(),
                        "Provider outcome unknown, local record left unchanged"
                    );
                } else {
                    tracing::error!(
                        subscription_id = %current.id,
                        provider_subscription_id = provider_id,
                        action = action.name(),
                        error = %err,
                        "Provider action failed"
                    );
                }
                err
            })?;

        self.committer.submit(current, incoming, Timestamp::now()).await
    }
}

fn provider_id_of(subscription: &Subscription) -> Result<&str, SubscriptionError> {
    subscription.provider_subscription_id.as_deref().ok_or_else(|| {
        SubscriptionError::validation(
            "provider_subscription_id",
            "subscription is not linked to the payment provider",
        )
    })
}
