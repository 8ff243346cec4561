//! SubscribeHandler - Command handler for starting a paid subscription.
//!
//! 1. Create (or reuse an abandoned) `pending_approval` record
//! 2. Create the subscription at the provider, exactly once
//! 3. Link the provider id to the record and return the approval link
//!
//! The record id doubles as the provider idempotency key, so retrying an
//! abandoned signup after an unconfirmed create returns the subscription
//! PayPal already made instead of a second one.
//!
//! A linked signup still awaiting approval is settled first: if the
//! subscriber never approved it, it is expired and a new record started.

use std::sync::Arc;

use chrono::Duration;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::domain::subscription::{
    EventSource, PayloadDigest, Subscription, SubscriptionError, SubscriptionEvent,
    SubscriptionStatus,
};
use crate::ports::{CreateSubscriptionRequest, PaymentGateway, Subscriber, SubscriptionRepository};

use super::abandon_signup::{AbandonSignupHandler, SignupSettlement};
use super::commit::TransitionCommitter;

/// Command to subscribe the caller to a plan.
#[derive(Debug, Clone)]
pub struct SubscribeCommand {
    pub user_id: UserId,
    pub plan_id: String,
    pub subscriber: Subscriber,
}

/// Result of a successful subscribe.
#[derive(Debug, Clone)]
pub struct SubscribeResult {
    pub subscription: Subscription,
    /// Where the subscriber approves the payment at PayPal.
    pub approval_url: Option<String>,
}

/// Handler for subscribing users.
pub struct SubscribeHandler {
    repository: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    signups: AbandonSignupHandler,
}

impl SubscribeHandler {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        committer: Arc<TransitionCommitter>,
    ) -> Self {
        Self {
            signups: AbandonSignupHandler::new(repository.clone(), gateway.clone(), committer),
            repository,
            gateway,
        }
    }

    /// Approval window used when settling an earlier pending signup.
    pub fn with_approval_window(mut self, window: Duration) -> Self {
        self.signups = self.signups.with_approval_window(window);
        self
    }

    pub async fn handle(&self, cmd: SubscribeCommand) -> Result<SubscribeResult, SubscriptionError> {
        let plan_id = cmd.plan_id.trim().to_string();
        if plan_id.is_empty() {
            return Err(SubscriptionError::validation("plan_id", "plan_id is required"));
        }

        // 1. Pending record
        let pending = self.pending_record(&cmd.user_id, &plan_id).await?;

        // 2. Provider subscription
        let created = self
            .gateway
            .create_subscription(CreateSubscriptionRequest {
                plan_id: plan_id.clone(),
                subscriber: cmd.subscriber,
                local_reference: pending.id.to_string(),
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    subscription_id = %pending.id,
                    user_id = %cmd.user_id,
                    plan_id = %plan_id,
                    error = %e,
                    "Provider subscription could not be created"
                );
                SubscriptionError::from(e)
            })?;

        // 3. Link
        let now = Timestamp::now();
        let mut linked = pending.with_provider_subscription(
            created.provider_subscription_id.clone(),
            created.approval_url.clone(),
            now,
        )?;
        linked.plan_id = plan_id;

        let event = SubscriptionEvent::new(
            linked.id,
            "provider_linked",
            now,
            now,
            EventSource::UserAction,
            PayloadDigest::of_bytes(
                format!("provider-link:{}", created.provider_subscription_id).as_bytes(),
            ),
            linked.status,
            linked.version,
        );

        match self.repository.commit(&linked, pending.version, &event).await {
            Ok(()) => {}
            Err(DomainError {
                code: ErrorCode::DuplicateEvent,
                ..
            }) => {
                linked = self
                    .repository
                    .find_by_id(&pending.id)
                    .await?
                    .ok_or_else(|| SubscriptionError::not_found(pending.id.to_string()))?;
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            subscription_id = %linked.id,
            provider_subscription_id = %created.provider_subscription_id,
            user_id = %linked.user_id,
            version = linked.version,
            "Subscription awaiting approval"
        );

        Ok(SubscribeResult {
            subscription: linked,
            approval_url: created.approval_url,
        })
    }

    async fn pending_record(
        &self,
        user_id: &UserId,
        plan_id: &str,
    ) -> Result<Subscription, SubscriptionError> {
        if let Some(existing) = self.repository.find_live_by_user(user_id).await? {
            if existing.is_abandoned_signup() {
                tracing::info!(
                    subscription_id = %existing.id,
                    user_id = %user_id,
                    "Reusing abandoned signup"
                );
                return Ok(existing);
            }
            if existing.status != SubscriptionStatus::PendingApproval {
                return Err(SubscriptionError::already_subscribed(user_id.as_str()));
            }
            match self.signups.settle(existing).await? {
                SignupSettlement::Closed(_) => {}
                SignupSettlement::StillLive(_) => {
                    return Err(SubscriptionError::already_subscribed(user_id.as_str()));
                }
            }
        }

        let now = Timestamp::now();
        let record = Subscription::new_pending(user_id.clone(), plan_id, now);
        let created = SubscriptionEvent::new(
            record.id,
            "subscription_created",
            now,
            now,
            EventSource::UserAction,
            PayloadDigest::random(),
            record.status,
            record.version,
        );
        self.repository.insert(&record, &created).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::test_support::{user_id, Fixture};
    use crate::application::handlers::subscription::{AbandonSignupCommand, AbandonSignupHandler};
    use crate::ports::GatewayError;

    fn handler(fx: &Fixture) -> SubscribeHandler {
        SubscribeHandler::new(fx.repo.clone(), fx.gateway_arc(), fx.committer.clone())
    }

    fn subscribe(user: &str, plan: &str) -> SubscribeCommand {
        SubscribeCommand {
            user_id: user_id(user),
            plan_id: plan.to_string(),
            subscriber: Subscriber {
                email: Some(format!("{}@example.com", user)),
                given_name: None,
                surname: None,
            },
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Success Path
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn new_user_gets_linked_pending_record_and_approval_link() {
        let fx = Fixture::new();

        let result = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();

        let sub = result.subscription;
        assert_eq!(sub.status, SubscriptionStatus::PendingApproval);
        assert_eq!(sub.provider_subscription_id.as_deref(), Some("I-MOCK1"));
        assert_eq!(sub.version, Subscription::INITIAL_VERSION + 1);
        assert!(result.approval_url.is_some());
        assert_eq!(sub.metadata.approval_url, result.approval_url);

        let events = fx.repo.list_events(&sub.id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["subscription_created", "provider_linked"]);
    }

    #[tokio::test]
    async fn local_id_is_sent_as_idempotency_key() {
        let fx = Fixture::new();

        let result = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();

        let calls = fx.gateway.calls();
        assert_eq!(calls[0].method, "create_subscription");
        assert_eq!(calls[0].args[1], result.subscription.id.to_string());
    }

    #[tokio::test]
    async fn abandoned_signup_is_reused_for_next_attempt() {
        let fx = Fixture::new();
        fx.gateway.set_error(GatewayError::unavailable("503"));

        let err = handler(&fx).handle(subscribe("user-1", "P-OLD")).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::ProviderUnavailable(_)));
        let abandoned = fx
            .repo
            .find_live_by_user(&user_id("user-1"))
            .await
            .unwrap()
            .unwrap();
        assert!(abandoned.is_abandoned_signup());

        let result = handler(&fx).handle(subscribe("user-1", "P-NEW")).await.unwrap();

        assert_eq!(result.subscription.id, abandoned.id);
        assert_eq!(result.subscription.plan_id, "P-NEW");
        assert!(result.subscription.provider_subscription_id.is_some());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Unapproved Signups
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn subscribing_again_after_leaving_approval_starts_fresh() {
        let fx = Fixture::new();
        let first = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();
        AbandonSignupHandler::new(fx.repo.clone(), fx.gateway_arc(), fx.committer.clone())
            .handle(AbandonSignupCommand {
                user_id: user_id("user-1"),
            })
            .await
            .unwrap();

        let second = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();

        assert_ne!(second.subscription.id, first.subscription.id);
        assert_eq!(second.subscription.provider_subscription_id.as_deref(), Some("I-MOCK2"));
        let old = fx.stored(&first.subscription).await;
        assert_eq!(old.status, SubscriptionStatus::Expired);
        let events = fx.repo.list_events(&old.id).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, "approval_abandoned");
    }

    #[tokio::test]
    async fn unapproved_signup_is_closed_by_next_subscribe() {
        let fx = Fixture::new();
        let first = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();

        let second = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();

        assert_ne!(second.subscription.id, first.subscription.id);
        assert_eq!(second.subscription.status, SubscriptionStatus::PendingApproval);
        assert_eq!(
            fx.stored(&first.subscription).await.status,
            SubscriptionStatus::Expired
        );
        assert_eq!(fx.gateway.call_count("create_subscription"), 2);
    }

    #[tokio::test]
    async fn signup_approved_at_provider_blocks_second_subscribe() {
        let fx = Fixture::new();
        let first = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();
        fx.gateway.set_remote_status("I-MOCK1", "ACTIVE");

        let err = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap_err();

        assert_eq!(err, SubscriptionError::already_subscribed("user-1"));
        assert_eq!(
            fx.stored(&first.subscription).await.status,
            SubscriptionStatus::Active
        );
        assert_eq!(fx.gateway.call_count("create_subscription"), 1);
    }

    #[tokio::test]
    async fn unreadable_provider_inside_window_keeps_pending_signup() {
        let fx = Fixture::new();
        let first = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();
        fx.gateway
            .set_method_error("fetch_detail", GatewayError::unavailable("503"));

        let err = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::ProviderUnavailable(_)));
        assert_eq!(
            fx.stored(&first.subscription).await.status,
            SubscriptionStatus::PendingApproval
        );
    }

    #[tokio::test]
    async fn unreadable_provider_past_window_closes_stale_signup() {
        let fx = Fixture::new();
        let stale = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-OLD").await;
        fx.gateway
            .set_method_error("fetch_detail", GatewayError::unavailable("503"));

        let result = handler(&fx)
            .with_approval_window(Duration::hours(1))
            .handle(subscribe("user-1", "P-PLAN"))
            .await
            .unwrap();

        assert_ne!(result.subscription.id, stale.id);
        assert_eq!(fx.stored(&stale).await.status, SubscriptionStatus::Expired);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Failure Paths
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn live_subscription_blocks_subscribe() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;

        let err = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap_err();

        assert_eq!(err, SubscriptionError::already_subscribed("user-1"));
        assert!(!fx.gateway.was_called("create_subscription"));
    }

    #[tokio::test]
    async fn create_is_attempted_once_on_timeout() {
        let fx = Fixture::new();
        fx.gateway
            .set_method_error("create_subscription", GatewayError::timeout("slow"));

        let err = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::Unconfirmed(_)));
        assert_eq!(fx.gateway.call_count("create_subscription"), 1);
    }

    #[tokio::test]
    async fn blank_plan_is_rejected() {
        let fx = Fixture::new();
        let err = handler(&fx).handle(subscribe("user-1", "  ")).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn terminal_history_does_not_block_subscribe() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Cancelled, "I-OLD").await;

        let result = handler(&fx).handle(subscribe("user-1", "P-PLAN")).await.unwrap();
        assert_eq!(result.subscription.status, SubscriptionStatus::PendingApproval);
    }
}
