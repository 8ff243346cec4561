//! IngestWebhookHandler - Command handler for PayPal webhook deliveries.
//!
//! 1. Verify the delivery came from PayPal (fail closed)
//! 2. Translate the payload into a lifecycle event, ignoring irrelevant types
//! 3. Dedupe on the provider event id
//! 4. Hand the event to the committer
//!
//! Steps 3 and 4 run under a processing deadline so the provider gets a
//! retryable answer instead of a dropped connection.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    confirms_requested_cancellation, EventSource, IncomingEvent, LifecycleEvent,
    SubscriptionError, SubscriptionStatus,
};
use crate::domain::webhook::{PayPalWebhookEvent, ProviderNotice, TransmissionHeaders, WebhookError};
use crate::ports::{SubscriptionRepository, WebhookSignatureVerifier};

use super::commit::{CommitOutcome, TransitionCommitter};

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct IngestWebhookCommand {
    pub headers: TransmissionHeaders,
    pub body: Vec<u8>,
}

/// How an authentic delivery was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A transition was written.
    Processed,
    /// The event id was seen before.
    Duplicate,
    /// The record already reflected the event.
    NoOp,
    /// Event type carries nothing for the lifecycle.
    Ignored,
    /// Provider confirmed a cancellation requested here; entitlement runs to period end.
    ConfirmedCancellation,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::NoOp => "no_op",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::ConfirmedCancellation => "confirmed_cancellation",
        }
    }
}

/// Handler for PayPal webhook deliveries.
pub struct IngestWebhookHandler {
    verifier: Arc<dyn WebhookSignatureVerifier>,
    repository: Arc<dyn SubscriptionRepository>,
    committer: Arc<TransitionCommitter>,
    processing_timeout: Duration,
}

impl IngestWebhookHandler {
    pub fn new(
        verifier: Arc<dyn WebhookSignatureVerifier>,
        repository: Arc<dyn SubscriptionRepository>,
        committer: Arc<TransitionCommitter>,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            repository,
            committer,
            processing_timeout,
        }
    }

    pub async fn handle(&self, cmd: IngestWebhookCommand) -> Result<WebhookOutcome, WebhookError> {
        // 1. Authenticity
        if let Err(err) = self.verifier.verify(&cmd.headers, &cmd.body).await {
            tracing::warn!(
                transmission_id = %cmd.headers.transmission_id,
                error = %err,
                "Webhook signature verification failed"
            );
            return Err(err);
        }

        // 2. Translation
        let event = PayPalWebhookEvent::from_slice(&cmd.body).map_err(|err| {
            tracing::warn!(
                transmission_id = %cmd.headers.transmission_id,
                error = %err,
                "Malformed webhook payload"
            );
            err
        })?;

        let notice = match event.translate(Timestamp::now()) {
            Ok(notice) => notice,
            Err(WebhookError::Ignored(event_type)) => {
                tracing::debug!(
                    webhook_event_id = %event.id,
                    event_type = %event_type,
                    "Webhook event ignored"
                );
                return Ok(WebhookOutcome::Ignored);
            }
            Err(err) => {
                tracing::warn!(
                    webhook_event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "Webhook payload could not be translated"
                );
                return Err(err);
            }
        };

        // 3 + 4. Dedup and commit under the deadline
        let provider_id = notice.provider_subscription_id.clone();
        match tokio::time::timeout(self.processing_timeout, self.apply(&event.id, notice)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    webhook_event_id = %event.id,
                    provider_subscription_id = %provider_id,
                    timeout_ms = self.processing_timeout.as_millis() as u64,
                    "Webhook processing timed out"
                );
                Err(WebhookError::Timeout)
            }
        }
    }

    async fn apply(
        &self,
        webhook_event_id: &str,
        notice: ProviderNotice,
    ) -> Result<WebhookOutcome, WebhookError> {
        let current = self
            .repository
            .find_by_provider_id(&notice.provider_subscription_id)
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?
            .ok_or_else(|| {
                tracing::warn!(
                    webhook_event_id = %webhook_event_id,
                    provider_subscription_id = %notice.provider_subscription_id,
                    "Webhook for unknown subscription"
                );
                WebhookError::SubscriptionNotFound(notice.provider_subscription_id.clone())
            })?;

        if self
            .repository
            .event_exists(&current.id, &notice.payload_digest)
            .await
            .map_err(|e| WebhookError::Database(e.to_string()))?
        {
            tracing::debug!(
                webhook_event_id = %webhook_event_id,
                subscription_id = %current.id,
                "Duplicate webhook acknowledged"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        let now = Timestamp::now();
        if notice.event == LifecycleEvent::ProviderCancelled
            && confirms_requested_cancellation(&current, now)
        {
            tracing::info!(
                webhook_event_id = %webhook_event_id,
                subscription_id = %current.id,
                current_period_end = %current.current_period_end.to_rfc3339(),
                "Provider confirmed requested cancellation"
            );
            return Ok(WebhookOutcome::ConfirmedCancellation);
        }

        // A signup cancelled before approval never started a paid period.
        let event = match (notice.event, current.status) {
            (LifecycleEvent::ProviderCancelled, SubscriptionStatus::PendingApproval) => {
                LifecycleEvent::ApprovalAbandoned
            }
            (event, _) => event,
        };

        let incoming = IncomingEvent::new(
            event,
            EventSource::Webhook,
            notice.occurred_at,
            notice.payload_digest,
        )
        .with_arrival_seq(self.committer.next_arrival())
        .with_period(notice.period)
        .with_reason(notice.reason);

        match self.committer.submit(current, incoming, now).await {
            Ok(CommitOutcome::Applied(_)) => Ok(WebhookOutcome::Processed),
            Ok(CommitOutcome::NoOp { .. }) => Ok(WebhookOutcome::NoOp),
            Ok(CommitOutcome::Duplicate(_)) => Ok(WebhookOutcome::Duplicate),
            Err(err) => Err(webhook_error(err)),
        }
    }
}

fn webhook_error(err: SubscriptionError) -> WebhookError {
    match err {
        SubscriptionError::InvalidTransition { current, attempted } => {
            WebhookError::InvalidTransition(format!("{} from {}", attempted, current))
        }
        SubscriptionError::StaleWrite => WebhookError::StaleWrite,
        SubscriptionError::NotFound(what) => WebhookError::SubscriptionNotFound(what),
        other => WebhookError::Database(other.message()),
    }
}
