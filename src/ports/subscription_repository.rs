//! Subscription repository port.
//!
//! Persistence for the `Subscription` record and its append-only
//! `SubscriptionEvent` log. The record is only ever modified through
//! `commit`, a compare-and-swap on `version` that appends the matching
//! audit event in the same atomic unit.
//!
//! # Example
//!
//! ```ignore
//! let current = repo.find_by_id(&id).await?.ok_or(not_found)?;
//! if let Decision::Apply(t) = reconciler.decide(&current, &incoming, now) {
//!     repo.commit(&t.next, current.version, &t.event).await?;
//! }
//! ```

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{PayloadDigest, Subscription, SubscriptionEvent};

/// Repository port for subscription records and their audit log.
///
/// Implementations must ensure:
/// - At most one non-terminal record per user
/// - `(subscription_id, payload_digest)` unique in the event log
/// - Record update and event append succeed or fail together
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Inserts a new record together with its creation event.
    ///
    /// # Errors
    ///
    /// - `SubscriptionExists` if the user already has a non-terminal record
    /// - `DatabaseError` on persistence failure
    async fn insert(
        &self,
        subscription: &Subscription,
        event: &SubscriptionEvent,
    ) -> Result<(), DomainError>;

    /// Writes `next` if the stored version still equals `expected_version`,
    /// appending `event` atomically.
    ///
    /// # Errors
    ///
    /// - `StaleWrite` if the stored version moved on
    /// - `DuplicateEvent` if the event digest was already recorded
    /// - `SubscriptionNotFound` if the record does not exist
    /// - `ValidationFailed` if `next.version != expected_version + 1`
    /// - `DatabaseError` on persistence failure
    async fn commit(
        &self,
        next: &Subscription,
        expected_version: u64,
        event: &SubscriptionEvent,
    ) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// The user's non-terminal record, if any.
    async fn find_live_by_user(&self, user_id: &UserId)
        -> Result<Option<Subscription>, DomainError>;

    /// The user's most recently created record, terminal or not.
    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    async fn find_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    /// True if an event with this digest was recorded for the subscription.
    async fn event_exists(
        &self,
        subscription_id: &SubscriptionId,
        digest: &PayloadDigest,
    ) -> Result<bool, DomainError>;

    /// Audit events of one record, oldest first.
    async fn list_events(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError>;

    /// Audit events across all of a user's records, newest first.
    async fn list_events_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<SubscriptionEvent>, DomainError>;

    /// `cancelling` records whose period ended at or before `now`.
    async fn find_cancelling_due(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Non-terminal records with a provider id, least recently reconciled
    /// first. Records never reconciled come before all others.
    async fn find_reconcilable(&self, limit: u32) -> Result<Vec<Subscription>, DomainError>;

    /// Records that a reconciliation read of the record happened at `at`.
    ///
    /// Does not touch `version` or the audit log.
    async fn mark_reconciled(&self, id: &SubscriptionId, at: Timestamp) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn SubscriptionRepository) {}
    }
}
