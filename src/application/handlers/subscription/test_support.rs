//! Fixtures shared by the subscription handler tests.

use std::sync::Arc;

use crate::adapters::memory::InMemorySubscriptionRepository;
use crate::adapters::paypal::MockPaymentGateway;
use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    EventSource, PayloadDigest, Reconciler, Subscription, SubscriptionEvent, SubscriptionStatus,
};
use crate::ports::{RemoteSubscription, SubscriptionRepository};

use super::TransitionCommitter;

pub struct Fixture {
    pub repo: Arc<InMemorySubscriptionRepository>,
    pub gateway: MockPaymentGateway,
    pub committer: Arc<TransitionCommitter>,
}

impl Fixture {
    pub fn new() -> Self {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        let committer = Arc::new(TransitionCommitter::new(repo.clone(), Reconciler::default()));
        Self {
            repo,
            gateway: MockPaymentGateway::new(),
            committer,
        }
    }

    pub fn gateway_arc(&self) -> Arc<MockPaymentGateway> {
        Arc::new(self.gateway.clone())
    }

    /// Stores a record for `user` in `status`, linked to `provider_id` both
    /// locally and at the mock provider.
    pub async fn seed(&self, user: &str, status: SubscriptionStatus, provider_id: &str) -> Subscription {
        self.seed_ending(user, status, provider_id, Timestamp::now().add_days(20))
            .await
    }

    /// Like `seed`, with a thirty day period ending at `period_end`.
    pub async fn seed_ending(
        &self,
        user: &str,
        status: SubscriptionStatus,
        provider_id: &str,
        period_end: Timestamp,
    ) -> Subscription {
        let now = Timestamp::now();
        let mut sub = Subscription::new_pending(user_id(user), "P-PLAN", now.add_days(-10));
        sub.provider_subscription_id = Some(provider_id.to_string());
        sub.status = status;
        sub.current_period_start = period_end.add_days(-30);
        sub.current_period_end = period_end;
        sub.cancel_at_period_end = status == SubscriptionStatus::Cancelling;

        let created = SubscriptionEvent::new(
            sub.id,
            "subscription_created",
            sub.created_at,
            now,
            EventSource::UserAction,
            PayloadDigest::random(),
            sub.status,
            sub.version,
        );
        self.repo.insert(&sub, &created).await.unwrap();

        self.gateway.set_remote(RemoteSubscription {
            provider_subscription_id: provider_id.to_string(),
            status: remote_status(status).to_string(),
            plan_id: Some("P-PLAN".to_string()),
            period: None,
            status_updated_at: Some(now),
            status_change_note: None,
        });

        sub
    }

    pub async fn stored(&self, sub: &Subscription) -> Subscription {
        self.repo.find_by_id(&sub.id).await.unwrap().unwrap()
    }
}

pub fn user_id(user: &str) -> UserId {
    UserId::new(user).unwrap()
}

fn remote_status(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::PendingApproval => "APPROVAL_PENDING",
        SubscriptionStatus::Active => "ACTIVE",
        SubscriptionStatus::Suspended => "SUSPENDED",
        SubscriptionStatus::Cancelling | SubscriptionStatus::Cancelled => "CANCELLED",
        SubscriptionStatus::Expired => "EXPIRED",
    }
}
