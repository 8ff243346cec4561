//! ReactivateSubscriptionHandler - Command handler for resuming a suspended subscription.

use std::sync::Arc;

use crate::domain::foundation::UserId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::commit::{CommitOutcome, TransitionCommitter};
use super::user_action::{ProviderAction, UserActionRunner};

/// Command to reactivate the caller's suspended subscription.
#[derive(Debug, Clone)]
pub struct ReactivateSubscriptionCommand {
    pub user_id: UserId,
    pub reason: Option<String>,
}

/// Handler for reactivating subscriptions.
///
/// Reactivating an `active` record is acknowledged as a no-op without a
/// provider call.
pub struct ReactivateSubscriptionHandler {
    runner: UserActionRunner,
}

impl ReactivateSubscriptionHandler {
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
        cmd: ReactivateSubscriptionCommand,
    ) -> Result<CommitOutcome, SubscriptionError> {
        self.runner
            .run(ProviderAction::Reactivate, &cmd.user_id, cmd.reason)
            .await
    }
}
