//! In-memory subscription repository.
//!
//! Enforces the same rules as the PostgreSQL adapter: compare-and-swap on
//! `version`, one non-terminal record per user, unique provider id and
//! unique `(subscription_id, payload_digest)` events. A single lock guards
//! records and events so a commit is atomic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{
    PayloadDigest, Subscription, SubscriptionEvent, SubscriptionStatus,
};
use crate::ports::SubscriptionRepository;

#[derive(Default)]
struct Store {
    records: HashMap<SubscriptionId, Subscription>,
    events: Vec<SubscriptionEvent>,
    reconciled_at: HashMap<SubscriptionId, Timestamp>,
}

impl Store {
    fn digest_taken(&self, subscription_id: &SubscriptionId, digest: &PayloadDigest) -> bool {
        self.events
            .iter()
            .any(|e| e.subscription_id == *subscription_id && e.payload_digest == *digest)
    }

    fn live_for_user(&self, user_id: &UserId, except: Option<&SubscriptionId>) -> bool {
        self.records.values().any(|s| {
            s.user_id == *user_id && !s.is_terminal() && Some(&s.id) != except
        })
    }

    fn provider_id_taken(&self, provider_id: &str, except: &SubscriptionId) -> bool {
        self.records.values().any(|s| {
            s.id != *except && s.provider_subscription_id.as_deref() == Some(provider_id)
        })
    }
}

/// Subscription repository backed by process memory.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    store: RwLock<Store>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>, DomainError> {
        self.store
            .read()
            .map_err(|_| DomainError::database("subscription store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>, DomainError> {
        self.store
            .write()
            .map_err(|_| DomainError::database("subscription store lock poisoned"))
    }

    /// Number of audit events recorded (for test assertions).
    pub fn event_count(&self) -> usize {
        self.read().map(|s| s.events.len()).unwrap_or_default()
    }

    /// All audit events in append order (for test assertions).
    pub fn all_events(&self) -> Vec<SubscriptionEvent> {
        self.read().map(|s| s.events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(
        &self,
        subscription: &Subscription,
        event: &SubscriptionEvent,
    ) -> Result<(), DomainError> {
        let mut store = self.write()?;

        if store.records.contains_key(&subscription.id) {
            return Err(DomainError::database("duplicate subscription id"));
        }
        if !subscription.is_terminal() && store.live_for_user(&subscription.user_id, None) {
            return Err(DomainError::new(
                ErrorCode::SubscriptionExists,
                "User already has a live subscription",
            )
            .with_detail("user_id", subscription.user_id.as_str()));
        }

        store.records.insert(subscription.id, subscription.clone());
        store.events.push(event.clone());
        Ok(())
    }

    async fn commit(
        &self,
        next: &Subscription,
        expected_version: u64,
        event: &SubscriptionEvent,
    ) -> Result<(), DomainError> {
        if next.version != expected_version + 1 {
            return Err(DomainError::validation(
                "version",
                format!(
                    "next version {} must follow expected version {}",
                    next.version, expected_version
                ),
            ));
        }

        let mut store = self.write()?;

        let stored = store.records.get(&next.id).ok_or_else(|| {
            DomainError::new(ErrorCode::SubscriptionNotFound, next.id.to_string())
        })?;
        if stored.version != expected_version {
            return Err(DomainError::new(ErrorCode::StaleWrite, "Subscription version moved")
                .with_detail("expected", expected_version.to_string())
                .with_detail("actual", stored.version.to_string()));
        }
        if stored.provider_subscription_id.is_some()
            && stored.provider_subscription_id != next.provider_subscription_id
        {
            return Err(DomainError::new(
                ErrorCode::ProviderIdImmutable,
                "Provider subscription id is already set",
            ));
        }
        if store.digest_taken(&next.id, &event.payload_digest) {
            return Err(DomainError::new(ErrorCode::DuplicateEvent, "Event already recorded")
                .with_detail("payload_digest", event.payload_digest.as_str()));
        }
        if let Some(provider_id) = next.provider_subscription_id.as_deref() {
            if store.provider_id_taken(provider_id, &next.id) {
                return Err(DomainError::database("provider subscription id already linked"));
            }
        }
        if !next.is_terminal() && store.live_for_user(&next.user_id, Some(&next.id)) {
            return Err(DomainError::new(
                ErrorCode::SubscriptionExists,
                "User already has a live subscription",
            )
            .with_detail("user_id", next.user_id.as_str()));
        }

        store.records.insert(next.id, next.clone());
        store.events.push(event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.read()?.records.get(id).cloned())
    }

    async fn find_live_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .read()?
            .records
            .values()
            .find(|s| s.user_id == *user_id && !s.is_terminal())
            .cloned())
    }

    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|s| s.user_id == *user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .read()?
            .records
            .values()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn event_exists(
        &self,
        subscription_id: &SubscriptionId,
        digest: &PayloadDigest,
    ) -> Result<bool, DomainError> {
        Ok(self.read()?.digest_taken(subscription_id, digest))
    }

    async fn list_events(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| e.subscription_id == *subscription_id)
            .cloned()
            .collect())
    }

    async fn list_events_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        let store = self.read()?;
        let mut events: Vec<SubscriptionEvent> = store
            .events
            .iter()
            .filter(|e| {
                store
                    .records
                    .get(&e.subscription_id)
                    .is_some_and(|s| s.user_id == *user_id)
            })
            .cloned()
            .collect();
        events.reverse();
        events.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn find_cancelling_due(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let store = self.read()?;
        let mut due: Vec<Subscription> = store
            .records
            .values()
            .filter(|s| s.status == SubscriptionStatus::Cancelling && s.period_elapsed(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find_reconcilable(&self, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        let store = self.read()?;
        let mut live: Vec<Subscription> = store
            .records
            .values()
            .filter(|s| !s.is_terminal() && s.provider_subscription_id.is_some())
            .cloned()
            .collect();
        live.sort_by_key(|s| (store.reconciled_at.get(&s.id).copied(), s.updated_at));
        live.truncate(limit as usize);
        Ok(live)
    }

    async fn mark_reconciled(&self, id: &SubscriptionId, at: Timestamp) -> Result<(), DomainError> {
        let mut store = self.write()?;
        if !store.records.contains_key(id) {
            return Err(DomainError::new(ErrorCode::SubscriptionNotFound, id.to_string()));
        }
        store.reconciled_at.insert(*id, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::{EventSource, LifecycleEvent};

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn created_event(sub: &Subscription) -> SubscriptionEvent {
        SubscriptionEvent::new(
            sub.id,
            "subscription_created",
            sub.created_at,
            sub.created_at,
            EventSource::UserAction,
            PayloadDigest::random(),
            sub.status,
            sub.version,
        )
    }

    fn transition(sub: &Subscription, status: SubscriptionStatus, digest: PayloadDigest) -> (Subscription, SubscriptionEvent) {
        let mut next = sub.clone();
        next.status = status;
        next.version = sub.version + 1;
        let event = SubscriptionEvent::new(
            sub.id,
            LifecycleEvent::ApprovalConfirmed.as_str(),
            ts(10),
            ts(10),
            EventSource::Webhook,
            digest,
            status,
            next.version,
        );
        (next, event)
    }

    async fn seeded(repo: &InMemorySubscriptionRepository, user_id: &str) -> Subscription {
        let sub = Subscription::new_pending(user(user_id), "P-1", ts(0));
        repo.insert(&sub, &created_event(&sub)).await.unwrap();
        sub
    }

    #[tokio::test]
    async fn insert_rejects_second_live_record_for_user() {
        let repo = InMemorySubscriptionRepository::new();
        seeded(&repo, "u1").await;

        let again = Subscription::new_pending(user("u1"), "P-1", ts(1));
        let err = repo.insert(&again, &created_event(&again)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionExists);
    }

    #[tokio::test]
    async fn commit_with_matching_version_applies_and_appends() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (next, event) = transition(&sub, SubscriptionStatus::Active, PayloadDigest::random());

        repo.commit(&next, sub.version, &event).await.unwrap();

        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.version, sub.version + 1);
        assert_eq!(repo.list_events(&sub.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn commit_with_stale_version_is_rejected_and_changes_nothing() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (first, first_event) = transition(&sub, SubscriptionStatus::Active, PayloadDigest::random());
        let (second, second_event) = transition(&sub, SubscriptionStatus::Expired, PayloadDigest::random());

        repo.commit(&first, sub.version, &first_event).await.unwrap();
        let err = repo.commit(&second, sub.version, &second_event).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::StaleWrite);
        let stored = repo.find_by_id(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(repo.event_count(), 2);
    }

    #[tokio::test]
    async fn commit_with_recorded_digest_is_a_duplicate() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let digest = PayloadDigest::of_provider_event("WH-1");
        let (next, event) = transition(&sub, SubscriptionStatus::Active, digest.clone());
        repo.commit(&next, sub.version, &event).await.unwrap();

        let (again, again_event) = transition(&next, SubscriptionStatus::Suspended, digest.clone());
        let err = repo.commit(&again, next.version, &again_event).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::DuplicateEvent);
        assert!(repo.event_exists(&sub.id, &digest).await.unwrap());
    }

    #[tokio::test]
    async fn commit_rejects_version_skips() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (mut next, event) = transition(&sub, SubscriptionStatus::Active, PayloadDigest::random());
        next.version += 1;

        let err = repo.commit(&next, sub.version, &event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn provider_id_is_immutable_once_stored() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (mut linked, event) = transition(&sub, SubscriptionStatus::PendingApproval, PayloadDigest::random());
        linked.provider_subscription_id = Some("I-1".into());
        repo.commit(&linked, sub.version, &event).await.unwrap();

        let (mut relinked, event) = transition(&linked, SubscriptionStatus::PendingApproval, PayloadDigest::random());
        relinked.provider_subscription_id = Some("I-2".into());
        let err = repo.commit(&relinked, linked.version, &event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderIdImmutable);
    }

    #[tokio::test]
    async fn terminal_record_frees_user_for_a_new_one() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (expired, event) = transition(&sub, SubscriptionStatus::Expired, PayloadDigest::random());
        repo.commit(&expired, sub.version, &event).await.unwrap();

        let fresh = Subscription::new_pending(user("u1"), "P-2", ts(5));
        repo.insert(&fresh, &created_event(&fresh)).await.unwrap();

        assert_eq!(repo.find_live_by_user(&user("u1")).await.unwrap().unwrap().id, fresh.id);
        assert_eq!(repo.find_latest_by_user(&user("u1")).await.unwrap().unwrap().id, fresh.id);
    }

    #[tokio::test]
    async fn cancelling_due_only_returns_elapsed_periods() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (mut cancelling, event) = transition(&sub, SubscriptionStatus::Cancelling, PayloadDigest::random());
        cancelling.current_period_end = ts(100);
        cancelling.cancel_at_period_end = true;
        repo.commit(&cancelling, sub.version, &event).await.unwrap();

        assert!(repo.find_cancelling_due(ts(99), 10).await.unwrap().is_empty());
        assert_eq!(repo.find_cancelling_due(ts(100), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconcilable_records_rotate_by_last_read() {
        let repo = InMemorySubscriptionRepository::new();
        let mut ids = Vec::new();
        for user_id in ["u1", "u2", "u3"] {
            let sub = seeded(&repo, user_id).await;
            let (mut linked, event) = transition(&sub, SubscriptionStatus::Active, PayloadDigest::random());
            linked.provider_subscription_id = Some(format!("I-{}", user_id));
            repo.commit(&linked, sub.version, &event).await.unwrap();
            ids.push(sub.id);
        }

        let first: Vec<_> = repo.find_reconcilable(2).await.unwrap().iter().map(|s| s.id).collect();
        for id in &first {
            repo.mark_reconciled(id, ts(50)).await.unwrap();
        }
        let second = repo.find_reconcilable(2).await.unwrap();

        let missed: Vec<_> = ids.iter().filter(|id| !first.contains(id)).collect();
        assert_eq!(missed.len(), 1);
        assert_eq!(&second[0].id, missed[0]);
    }

    #[tokio::test]
    async fn marking_unknown_record_is_not_found() {
        let repo = InMemorySubscriptionRepository::new();
        let err = repo.mark_reconciled(&SubscriptionId::new(), ts(1)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
    }

    #[tokio::test]
    async fn events_for_user_are_newest_first() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = seeded(&repo, "u1").await;
        let (next, event) = transition(&sub, SubscriptionStatus::Active, PayloadDigest::random());
        repo.commit(&next, sub.version, &event).await.unwrap();
        seeded(&repo, "u2").await;

        let events = repo.list_events_for_user(&user("u1"), 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].resulting_status, SubscriptionStatus::Active);
    }
}
