//! CancelSubscriptionHandler - Command handler for subscriber cancellations.

use std::sync::Arc;

use crate::domain::foundation::UserId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::commit::{CommitOutcome, TransitionCommitter};
use super::user_action::{ProviderAction, UserActionRunner};

/// Command to cancel the caller's subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
    pub reason: Option<String>,
}

/// Handler for cancelling subscriptions.
///
/// The record moves to `cancelling` and keeps entitlement until
/// `current_period_end`; the period sweeper finishes the cancellation.
pub struct CancelSubscriptionHandler {
    runner: UserActionRunner,
}

impl CancelSubscriptionHandler {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        committer: Arc<TransitionCommitter>,
    ) -> Self {
        Self {
            runner: UserActionRunner::new(repository, gateway, committer),
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CommitOutcome, SubscriptionError> {
        self.runner
            .run(ProviderAction::Cancel, &cmd.user_id, cmd.reason)
            .await
    }
}
