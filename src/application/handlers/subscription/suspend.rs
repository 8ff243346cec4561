//! SuspendSubscriptionHandler - Command handler for pausing a subscription.

use std::sync::Arc;

use crate::domain::foundation::UserId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{PaymentGateway, SubscriptionRepository};

use super::commit::{CommitOutcome, TransitionCommitter};
use super::user_action::{ProviderAction, UserActionRunner};

/// Command to suspend the caller's subscription.
#[derive(Debug, Clone)]
pub struct SuspendSubscriptionCommand {
    pub user_id: UserId,
    pub reason: Option<String>,
}

/// Handler for suspending subscriptions. Only `active` records qualify.
pub struct SuspendSubscriptionHandler {
    runner: UserActionRunner,
}

impl SuspendSubscriptionHandler {
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
        cmd: SuspendSubscriptionCommand,
    ) -> Result<CommitOutcome, SubscriptionError> {
        self.runner
            .run(ProviderAction::Suspend, &cmd.user_id, cmd.reason)
            .await
    }
}
