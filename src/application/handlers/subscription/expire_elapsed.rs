//! ExpireElapsedHandler - Background sweep finishing period-end cancellations.
//!
//! A `cancelling` record keeps access until `current_period_end`. Once that
//! passes, the sweep presents `PeriodElapsed` to the committer and the record
//! becomes `cancelled`. Events in one pass are applied in
//! `(occurred_at, arrival_seq)` order.

use std::sync::Arc;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    EventSource, IncomingEvent, LifecycleEvent, PayloadDigest, Subscription,
    SubscriptionError,
};
use crate::ports::SubscriptionRepository;

use super::commit::TransitionCommitter;

/// Totals of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct ExpireElapsedHandler {
    repository: Arc<dyn SubscriptionRepository>,
    committer: Arc<TransitionCommitter>,
}

impl ExpireElapsedHandler {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        committer: Arc<TransitionCommitter>,
    ) -> Self {
        Self {
            repository,
            committer,
        }
    }

    /// Applies `PeriodElapsed` to up to `limit` due records.
    pub async fn sweep(&self, now: Timestamp, limit: u32) -> Result<SweepReport, SubscriptionError> {
        let due = self.repository.find_cancelling_due(now, limit).await?;

        let mut batch: Vec<(Subscription, IncomingEvent)> = due
            .into_iter()
            .map(|record| {
                let incoming = period_elapsed(&record)
                    .with_arrival_seq(self.committer.next_arrival());
                (record, incoming)
            })
            .collect();
        batch.sort_by(|(_, a), (_, b)| a.cmp_order(b));

        let mut report = SweepReport {
            examined: batch.len(),
            ..Default::default()
        };

        for (record, incoming) in batch {
            let id = record.id;
            match self.committer.submit(record, incoming, now).await {
                Ok(outcome) if outcome.is_applied() => report.expired += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        subscription_id = %id,
                        error = %err,
                        "Period sweep could not finish cancellation"
                    );
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                failed = report.failed,
                "Period sweep finished"
            );
        }
        Ok(report)
    }
}

fn period_elapsed(record: &Subscription) -> IncomingEvent {
    let digest = PayloadDigest::of_bytes(
        format!(
            "period-elapsed:{}:{}",
            record.id,
            record.current_period_end.to_rfc3339()
        )
        .as_bytes(),
    );
    IncomingEvent::new(
        LifecycleEvent::PeriodElapsed,
        EventSource::ReconciliationRead,
        record.current_period_end,
        digest,
    )
}
