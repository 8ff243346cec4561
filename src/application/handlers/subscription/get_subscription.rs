//! Query handlers for a user's subscription and its audit history.

use std::sync::Arc;

use crate::domain::foundation::UserId;
use crate::domain::subscription::{Subscription, SubscriptionError, SubscriptionEvent};
use crate::ports::SubscriptionRepository;

/// Query for the caller's current subscription.
#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub user_id: UserId,
}

/// Returns the live record, or the most recent terminal one, or `None`.
pub struct GetSubscriptionHandler {
    repository: Arc<dyn SubscriptionRepository>,
}

impl GetSubscriptionHandler {
    pub fn new(repository: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repository }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        if let Some(live) = self.repository.find_live_by_user(&query.user_id).await? {
            return Ok(Some(live));
        }
        Ok(self.repository.find_latest_by_user(&query.user_id).await?)
    }
}

/// Query for the audit events of the caller's subscriptions.
#[derive(Debug, Clone)]
pub struct GetSubscriptionHistoryQuery {
    pub user_id: UserId,
    pub limit: u32,
}

impl GetSubscriptionHistoryQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 200;
}

/// Returns audit events newest first.
pub struct GetSubscriptionHistoryHandler {
    repository: Arc<dyn SubscriptionRepository>,
}

impl GetSubscriptionHistoryHandler {
    pub fn new(repository: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repository }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionHistoryQuery,
    ) -> Result<Vec<SubscriptionEvent>, SubscriptionError> {
        let limit = query.limit.clamp(1, GetSubscriptionHistoryQuery::MAX_LIMIT);
        Ok(self
            .repository
            .list_events_for_user(&query.user_id, limit)
            .await?)
    }
}
