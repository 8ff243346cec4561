//! CheckEntitlementHandler - Query handler for paid-access checks.
//!
//! Reads the local record only. The payment provider is never consulted.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    Entitlement, EntitlementGate, SubscriptionError, SubscriptionStatus,
};
use crate::ports::SubscriptionRepository;

/// Query to check a user's access.
#[derive(Debug, Clone)]
pub struct CheckEntitlementQuery {
    pub user_id: UserId,
}

/// Access decision plus the record state it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEntitlementResult {
    pub entitlement: Entitlement,
    pub status: Option<SubscriptionStatus>,
    /// When access ends if nothing else happens.
    pub access_until: Option<Timestamp>,
}

pub struct CheckEntitlementHandler {
    repository: Arc<dyn SubscriptionRepository>,
    gate: EntitlementGate,
}

impl CheckEntitlementHandler {
    pub fn new(repository: Arc<dyn SubscriptionRepository>, gate: EntitlementGate) -> Self {
        Self { repository, gate }
    }

    pub async fn handle(
        &self,
        query: CheckEntitlementQuery,
    ) -> Result<CheckEntitlementResult, SubscriptionError> {
        let record = match self.repository.find_live_by_user(&query.user_id).await? {
            Some(live) => Some(live),
            None => self.repository.find_latest_by_user(&query.user_id).await?,
        };

        let entitlement = self.gate.check(record.as_ref(), Timestamp::now());
        let access_until = record
            .as_ref()
            .filter(|_| entitlement.is_entitled())
            .filter(|s| s.status != SubscriptionStatus::PendingApproval)
            .map(|s| s.current_period_end);

        Ok(CheckEntitlementResult {
            entitlement,
            status: record.map(|s| s.status),
            access_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::test_support::{user_id, Fixture};
    use crate::domain::subscription::NotEntitledReason;

    async fn check(fx: &Fixture, gate: EntitlementGate, user: &str) -> CheckEntitlementResult {
        CheckEntitlementHandler::new(fx.repo.clone(), gate)
            .handle(CheckEntitlementQuery {
                user_id: user_id(user),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn active_subscriber_is_entitled_until_period_end() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;

        let result = check(&fx, EntitlementGate::default(), "user-1").await;

        assert_eq!(result.entitlement, Entitlement::Entitled);
        assert_eq!(result.status, Some(SubscriptionStatus::Active));
        assert_eq!(result.access_until, Some(sub.current_period_end));
    }

    #[tokio::test]
    async fn suspended_subscriber_is_not_entitled() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Suspended, "I-1").await;

        let result = check(&fx, EntitlementGate::default(), "user-1").await;

        assert_eq!(
            result.entitlement,
            Entitlement::NotEntitled(NotEntitledReason::Suspended)
        );
        assert!(result.access_until.is_none());
    }

    #[tokio::test]
    async fn pending_record_uses_grace_window() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;

        let strict = check(&fx, EntitlementGate::default(), "user-1").await;
        assert_eq!(
            strict.entitlement,
            Entitlement::NotEntitled(NotEntitledReason::AwaitingApproval)
        );

        // Seeded records were created ten days ago.
        let generous = check(&fx, EntitlementGate::with_grace_minutes(60 * 24 * 11), "user-1").await;
        assert!(generous.entitlement.is_entitled());
        assert!(generous.access_until.is_none());
    }

    #[tokio::test]
    async fn user_without_records_has_no_subscription() {
        let fx = Fixture::new();
        let result = check(&fx, EntitlementGate::default(), "nobody").await;
        assert_eq!(
            result.entitlement,
            Entitlement::NotEntitled(NotEntitledReason::NoSubscription)
        );
        assert_eq!(result.status, None);
    }

    #[tokio::test]
    async fn expired_history_is_reported() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Expired, "I-1").await;

        let result = check(&fx, EntitlementGate::default(), "user-1").await;

        assert_eq!(
            result.entitlement,
            Entitlement::NotEntitled(NotEntitledReason::Expired)
        );
        assert_eq!(result.status, Some(SubscriptionStatus::Expired));
    }
}
