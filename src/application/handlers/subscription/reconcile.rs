//! ReconcileSubscriptionHandler - Pull-based refresh of provider state.
//!
//! Used on the approval return flow and by the scheduled reconciliation
//! job. The provider's view is turned into a lifecycle event sourced as
//! `reconciliation_read` and fed to the committer exactly like a webhook.

use std::sync::Arc;

use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::subscription::{
    confirms_requested_cancellation, event_for_provider_status, EventSource, IncomingEvent,
    LifecycleEvent, NoOpReason, PayloadDigest, Subscription, SubscriptionError,
};
use crate::ports::{PaymentGateway, RemoteSubscription, SubscriptionRepository};

use super::commit::{CommitOutcome, TransitionCommitter};

/// Command to refresh the caller's subscription from the provider.
#[derive(Debug, Clone)]
pub struct ReconcileSubscriptionCommand {
    pub user_id: UserId,
}

/// Result of a single reconciliation read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub subscription: Subscription,
    /// True if the read moved the local record.
    pub changed: bool,
}

/// Totals of one scheduled reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Handler for reconciliation reads.
pub struct ReconcileSubscriptionHandler {
    repository: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    committer: Arc<TransitionCommitter>,
}

impl ReconcileSubscriptionHandler {
    pub fn new(
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

    /// Refreshes the caller's live record; a user with only terminal
    /// records gets the latest one back unchanged.
    pub async fn handle(
        &self,
        cmd: ReconcileSubscriptionCommand,
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

        match self.reconcile(current.clone()).await {
            Ok(outcome) => Ok(ReconcileResult {
                changed: outcome.is_applied(),
                subscription: outcome.into_subscription(),
            }),
            // Provider state we cannot follow locally; the record stays as it is.
            Err(SubscriptionError::InvalidTransition { .. }) => Ok(ReconcileResult {
                subscription: current,
                changed: false,
            }),
            Err(err) => Err(err),
        }
    }

    /// Reads up to `limit` live records from the provider, those read
    /// longest ago (or never) first. Every record examined is marked as
    /// read, whatever the outcome, so successive passes cover all records.
    pub async fn reconcile_batch(&self, limit: u32) -> Result<ReconcileReport, SubscriptionError> {
        let records = self.repository.find_reconcilable(limit).await?;
        let mut report = ReconcileReport {
            examined: records.len(),
            ..Default::default()
        };

        for record in records {
            let id = record.id;
            match self.reconcile(record).await {
                Ok(outcome) if outcome.is_applied() => report.changed += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        subscription_id = %id,
                        error = %err,
                        "Scheduled reconciliation failed"
                    );
                }
            }
            if let Err(err) = self.repository.mark_reconciled(&id, Timestamp::now()).await {
                tracing::error!(
                    subscription_id = %id,
                    error = %err,
                    "Could not record reconciliation read"
                );
            }
        }

        if report.changed > 0 || report.failed > 0 {
            tracing::info!(
                examined = report.examined,
                changed = report.changed,
                failed = report.failed,
                "Scheduled reconciliation pass finished"
            );
        }
        Ok(report)
    }

    async fn reconcile(&self, current: Subscription) -> Result<CommitOutcome, SubscriptionError> {
        let Some(provider_id) = current.provider_subscription_id.clone() else {
            return Ok(CommitOutcome::NoOp {
                subscription: current,
                reason: NoOpReason::AlreadyInState,
            });
        };

        let remote = self.gateway.fetch_detail(&provider_id).await.map_err(|e| {
            tracing::error!(
                subscription_id = %current.id,
                provider_subscription_id = %provider_id,
                error = %e,
                "Provider read failed"
            );
            SubscriptionError::from(e)
        })?;

        self.apply_remote(current, &remote).await
    }

    /// Feeds an already fetched provider view to the committer.
    pub(crate) async fn apply_remote(
        &self,
        current: Subscription,
        remote: &RemoteSubscription,
    ) -> Result<CommitOutcome, SubscriptionError> {
        let now = Timestamp::now();
        let event = match event_for_provider_status(&remote.status, &current) {
            Some(LifecycleEvent::ProviderCancelled)
                if confirms_requested_cancellation(&current, now) =>
            {
                None
            }
            other => other,
        };
        let Some(event) = event else {
            tracing::debug!(
                subscription_id = %current.id,
                provider_status = %remote.status,
                status = %current.status,
                "Provider state carries no change"
            );
            return Ok(CommitOutcome::NoOp {
                subscription: current,
                reason: NoOpReason::AlreadyInState,
            });
        };

        let incoming = IncomingEvent::new(
            event,
            EventSource::ReconciliationRead,
            remote.status_updated_at.unwrap_or(now),
            read_digest(remote),
        )
        .with_arrival_seq(self.committer.next_arrival())
        .with_period(remote.period)
        .with_reason(remote.status_change_note.clone());

        self.committer.submit(current, incoming, now).await
    }
}

/// Two reads of the same provider state produce the same digest.
fn read_digest(remote: &RemoteSubscription) -> PayloadDigest {
    let updated = remote
        .status_updated_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let period_end = remote
        .period
        .map(|p| p.end.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    PayloadDigest::of_bytes(
        format!(
            "read:{}:{}:{}:{}",
            remote.provider_subscription_id, remote.status, updated, period_end
        )
        .as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::subscription::test_support::{user_id, Fixture};
    use crate::domain::subscription::{BillingPeriod, SubscriptionStatus};
    use crate::ports::GatewayError;

    fn handler(fx: &Fixture) -> ReconcileSubscriptionHandler {
        ReconcileSubscriptionHandler::new(fx.repo.clone(), fx.gateway_arc(), fx.committer.clone())
    }

    fn reconcile(user: &str) -> ReconcileSubscriptionCommand {
        ReconcileSubscriptionCommand {
            user_id: user_id(user),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Return Flow
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn approved_subscription_is_activated_by_read() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway.set_remote_status("I-1", "ACTIVE");

        let result = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        let events = fx.repo.list_events(&sub.id).await.unwrap();
        assert_eq!(events.last().unwrap().source, EventSource::ReconciliationRead);
    }

    #[tokio::test]
    async fn still_pending_at_provider_changes_nothing() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;

        let result = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert!(!result.changed);
        assert_eq!(result.subscription, sub);
    }

    #[tokio::test]
    async fn repeated_read_of_same_state_is_idempotent() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;
        fx.gateway.set_remote_status("I-1", "SUSPENDED");

        let first = handler(&fx).handle(reconcile("user-1")).await.unwrap();
        let second = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.subscription.version, first.subscription.version);
        assert_eq!(fx.repo.event_count(), 2);
    }

    #[tokio::test]
    async fn provider_cancel_of_requested_cancellation_keeps_entitlement() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::Cancelling, "I-1").await;

        let result = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert!(!result.changed);
        assert_eq!(fx.stored(&sub).await.status, SubscriptionStatus::Cancelling);
    }

    #[tokio::test]
    async fn renewed_period_is_adopted() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;
        let start = sub.current_period_end;
        let end = start.add_days(30);
        fx.gateway.set_remote_period("I-1", BillingPeriod::new(start, end));

        let result = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.subscription.current_period_end, end);
    }

    #[tokio::test]
    async fn user_with_only_history_gets_latest_record() {
        let fx = Fixture::new();
        let sub = fx.seed("user-1", SubscriptionStatus::Expired, "I-1").await;

        let result = handler(&fx).handle(reconcile("user-1")).await.unwrap();

        assert_eq!(result.subscription.id, sub.id);
        assert!(!fx.gateway.was_called("fetch_detail"));
    }

    #[tokio::test]
    async fn provider_outage_is_surfaced() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.gateway
            .set_method_error("fetch_detail", GatewayError::unavailable("503"));

        let err = handler(&fx).handle(reconcile("user-1")).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::ProviderUnavailable(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Scheduled Pass
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn batch_counts_changes_and_failures() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::PendingApproval, "I-1").await;
        fx.seed("user-2", SubscriptionStatus::Active, "I-2").await;
        fx.seed("user-3", SubscriptionStatus::Active, "I-3").await;
        fx.gateway.set_remote_status("I-1", "ACTIVE");
        fx.gateway.set_remote_status("I-2", "EXPIRED");
        fx.gateway.remove_remote("I-3");

        let report = handler(&fx).reconcile_batch(10).await.unwrap();

        assert_eq!(report.examined, 3);
        assert_eq!(report.changed, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn successive_passes_reach_every_record() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;
        fx.seed("user-2", SubscriptionStatus::Active, "I-2").await;
        let newest = fx.seed("user-3", SubscriptionStatus::Active, "I-3").await;
        fx.gateway.set_remote_status("I-3", "CANCELLED");

        let first = handler(&fx).reconcile_batch(2).await.unwrap();
        let second = handler(&fx).reconcile_batch(2).await.unwrap();

        assert_eq!(first.examined, 2);
        assert_eq!(first.changed, 0);
        assert_eq!(second.changed, 1);
        assert_eq!(fx.stored(&newest).await.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn failed_read_still_moves_record_to_back_of_queue() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Active, "I-1").await;
        let second = fx.seed("user-2", SubscriptionStatus::Active, "I-2").await;
        fx.gateway.remove_remote("I-1");
        fx.gateway.set_remote_status("I-2", "SUSPENDED");

        let first_pass = handler(&fx).reconcile_batch(1).await.unwrap();
        let second_pass = handler(&fx).reconcile_batch(1).await.unwrap();

        assert_eq!(first_pass.failed, 1);
        assert_eq!(second_pass.changed, 1);
        assert_eq!(fx.stored(&second).await.status, SubscriptionStatus::Suspended);
    }

    #[tokio::test]
    async fn batch_skips_terminal_records() {
        let fx = Fixture::new();
        fx.seed("user-1", SubscriptionStatus::Cancelled, "I-1").await;

        let report = handler(&fx).reconcile_batch(10).await.unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert!(!fx.gateway.was_called("fetch_detail"));
    }
}
