//! PostgreSQL implementation of SubscriptionRepository.
//!
//! Every state change is one transaction: a version-guarded `UPDATE` of the
//! record followed by the `INSERT` of its audit event. Uniqueness rules live
//! in the schema and are translated back into domain error codes by
//! constraint name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, SubscriptionEventId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::{
    EventSource, PayloadDigest, Subscription, SubscriptionEvent, SubscriptionMetadata,
    SubscriptionStatus,
};
use crate::ports::SubscriptionRepository;

const ONE_LIVE_PER_USER: &str = "subscriptions_one_live_per_user";
const PROVIDER_ID_UNIQUE: &str = "subscriptions_provider_subscription_id_key";
const EVENT_DIGEST_UNIQUE: &str = "subscription_events_digest_key";

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, plan_id, provider_subscription_id, status,
    current_period_start, current_period_end, cancel_at_period_end, version,
    cancellation_reason, cancelled_by, suspension_reason, suspended_by, approval_url,
    last_event_at, created_at, updated_at
"#;

/// PostgreSQL implementation of the SubscriptionRepository port.
pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE {} ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS, clause
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::database(format!("Failed to find subscription: {}", e))
            })?;

        row.map(Subscription::try_from).transpose()
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan_id: String,
    provider_subscription_id: Option<String>,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    cancel_at_period_end: bool,
    version: i64,
    cancellation_reason: Option<String>,
    cancelled_by: Option<String>,
    suspension_reason: Option<String>,
    suspended_by: Option<String>,
    approval_url: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| {
                DomainError::database(format!("Invalid user_id: {}", e))
            })?,
            plan_id: row.plan_id,
            provider_subscription_id: row.provider_subscription_id,
            status: parse_status(&row.status)?,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            cancel_at_period_end: row.cancel_at_period_end,
            version: from_db_version(row.version)?,
            metadata: SubscriptionMetadata {
                cancellation_reason: row.cancellation_reason,
                cancelled_by: parse_optional_source(row.cancelled_by.as_deref())?,
                suspension_reason: row.suspension_reason,
                suspended_by: parse_optional_source(row.suspended_by.as_deref())?,
                approval_url: row.approval_url,
            },
            last_event_at: row.last_event_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Database row representation of an audit event.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    subscription_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    source: String,
    payload_digest: String,
    resulting_status: String,
    version: i64,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionEvent {
            id: SubscriptionEventId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            event_type: row.event_type,
            occurred_at: Timestamp::from_datetime(row.occurred_at),
            recorded_at: Timestamp::from_datetime(row.recorded_at),
            source: parse_source(&row.source)?,
            payload_digest: PayloadDigest::from_hex(row.payload_digest),
            resulting_status: parse_status(&row.resulting_status)?,
            version: from_db_version(row.version)?,
        })
    }
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, DomainError> {
    s.parse::<SubscriptionStatus>()
        .map_err(|e| DomainError::database(format!("Invalid status value: {}", e)))
}

fn parse_source(s: &str) -> Result<EventSource, DomainError> {
    EventSource::parse(s)
        .ok_or_else(|| DomainError::database(format!("Invalid event source: {}", s)))
}

fn parse_optional_source(s: Option<&str>) -> Result<Option<EventSource>, DomainError> {
    s.map(parse_source).transpose()
}

fn to_db_version(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version)
        .map_err(|_| DomainError::validation("version", "version exceeds storage range"))
}

fn from_db_version(version: i64) -> Result<u64, DomainError> {
    u64::try_from(version)
        .map_err(|_| DomainError::database(format!("Invalid stored version: {}", version)))
}

/// Maps unique-constraint violations to their domain meaning.
fn map_write_error(err: sqlx::Error, subscription: &Subscription, action: &str) -> DomainError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(ONE_LIVE_PER_USER) => {
                return DomainError::new(
                    ErrorCode::SubscriptionExists,
                    "User already has a live subscription",
                )
                .with_detail("user_id", subscription.user_id.as_str());
            }
            Some(EVENT_DIGEST_UNIQUE) => {
                return DomainError::new(ErrorCode::DuplicateEvent, "Event already recorded");
            }
            Some(PROVIDER_ID_UNIQUE) => {
                return DomainError::database("provider subscription id already linked");
            }
            _ => {}
        }
    }
    DomainError::database(format!("Failed to {}: {}", action, err))
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    subscription: &Subscription,
    event: &SubscriptionEvent,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO subscription_events (
            id, subscription_id, event_type, occurred_at, recorded_at,
            source, payload_digest, resulting_status, version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event.id.as_uuid())
    .bind(event.subscription_id.as_uuid())
    .bind(&event.event_type)
    .bind(event.occurred_at.as_datetime())
    .bind(event.recorded_at.as_datetime())
    .bind(event.source.as_str())
    .bind(event.payload_digest.as_str())
    .bind(event.resulting_status.as_str())
    .bind(to_db_version(event.version)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_write_error(e, subscription, "record subscription event"))?;

    Ok(())
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(
        &self,
        subscription: &Subscription,
        event: &SubscriptionEvent,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, provider_subscription_id, status,
                current_period_start, current_period_end, cancel_at_period_end, version,
                cancellation_reason, cancelled_by, suspension_reason, suspended_by, approval_url,
                last_event_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_str())
        .bind(&subscription.plan_id)
        .bind(&subscription.provider_subscription_id)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.cancel_at_period_end)
        .bind(to_db_version(subscription.version)?)
        .bind(&subscription.metadata.cancellation_reason)
        .bind(subscription.metadata.cancelled_by.map(|s| s.as_str()))
        .bind(&subscription.metadata.suspension_reason)
        .bind(subscription.metadata.suspended_by.map(|s| s.as_str()))
        .bind(&subscription.metadata.approval_url)
        .bind(subscription.last_event_at.map(|t| *t.as_datetime()))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, subscription, "save subscription"))?;

        insert_event(&mut tx, subscription, event).await?;

        tx.commit()
            .await
            .map_err(|e| DomainError::database(format!("Failed to commit: {}", e)))
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::database(format!("Failed to begin transaction: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = $3,
                provider_subscription_id = $4,
                status = $5,
                current_period_start = $6,
                current_period_end = $7,
                cancel_at_period_end = $8,
                version = $9,
                cancellation_reason = $10,
                cancelled_by = $11,
                suspension_reason = $12,
                suspended_by = $13,
                approval_url = $14,
                last_event_at = $15,
                updated_at = $16
            WHERE id = $1
              AND version = $2
              AND (provider_subscription_id IS NULL OR provider_subscription_id = $4)
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(to_db_version(expected_version)?)
        .bind(&next.plan_id)
        .bind(&next.provider_subscription_id)
        .bind(next.status.as_str())
        .bind(next.current_period_start.as_datetime())
        .bind(next.current_period_end.as_datetime())
        .bind(next.cancel_at_period_end)
        .bind(to_db_version(next.version)?)
        .bind(&next.metadata.cancellation_reason)
        .bind(next.metadata.cancelled_by.map(|s| s.as_str()))
        .bind(&next.metadata.suspension_reason)
        .bind(next.metadata.suspended_by.map(|s| s.as_str()))
        .bind(&next.metadata.approval_url)
        .bind(next.last_event_at.map(|t| *t.as_datetime()))
        .bind(next.updated_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, next, "update subscription"))?;

        if result.rows_affected() == 0 {
            // Work out which guard failed.
            let stored: Option<(i64, Option<String>)> = sqlx::query_as(
                "SELECT version, provider_subscription_id FROM subscriptions WHERE id = $1",
            )
            .bind(next.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| DomainError::database(format!("Failed to read subscription: {}", e)))?;

            return Err(match stored {
                None => DomainError::new(ErrorCode::SubscriptionNotFound, next.id.to_string()),
                Some((version, _)) if version != to_db_version(expected_version)? => {
                    DomainError::new(ErrorCode::StaleWrite, "Subscription version moved")
                        .with_detail("expected", expected_version.to_string())
                        .with_detail("actual", version.to_string())
                }
                Some(_) => DomainError::new(
                    ErrorCode::ProviderIdImmutable,
                    "Provider subscription id is already set",
                ),
            });
        }

        insert_event(&mut tx, next, event).await?;

        tx.commit()
            .await
            .map_err(|e| DomainError::database(format!("Failed to commit: {}", e)))
    }

    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let sql = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DomainError::database(format!("Failed to find subscription: {}", e))
            })?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_live_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        self.fetch_one_where(
            "user_id = $1 AND status NOT IN ('cancelled', 'expired')",
            user_id.as_str(),
        )
        .await
    }

    async fn find_latest_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        self.fetch_one_where("user_id = $1", user_id.as_str()).await
    }

    async fn find_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        self.fetch_one_where("provider_subscription_id = $1", provider_subscription_id)
            .await
    }

    async fn event_exists(
        &self,
        subscription_id: &SubscriptionId,
        digest: &PayloadDigest,
    ) -> Result<bool, DomainError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM subscription_events
                WHERE subscription_id = $1 AND payload_digest = $2
            )
            "#,
        )
        .bind(subscription_id.as_uuid())
        .bind(digest.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to check event: {}", e)))?;

        Ok(exists)
    }

    async fn list_events(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, subscription_id, event_type, occurred_at, recorded_at,
                   source, payload_digest, resulting_status, version
            FROM subscription_events
            WHERE subscription_id = $1
            ORDER BY version ASC, recorded_at ASC
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list events: {}", e)))?;

        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    async fn list_events_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<SubscriptionEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT e.id, e.subscription_id, e.event_type, e.occurred_at, e.recorded_at,
                   e.source, e.payload_digest, e.resulting_status, e.version
            FROM subscription_events e
            JOIN subscriptions s ON s.id = e.subscription_id
            WHERE s.user_id = $1
            ORDER BY e.recorded_at DESC, e.version DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list events: {}", e)))?;

        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }

    async fn find_cancelling_due(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'cancelling' AND current_period_end <= $1
            ORDER BY current_period_end ASC
            LIMIT $2
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(now.as_datetime())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DomainError::database(format!("Failed to find due subscriptions: {}", e))
            })?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn find_reconcilable(&self, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status NOT IN ('cancelled', 'expired')
              AND provider_subscription_id IS NOT NULL
            ORDER BY last_reconciled_at ASC NULLS FIRST, updated_at ASC
            LIMIT $1
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DomainError::database(format!("Failed to find reconcilable subscriptions: {}", e))
            })?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn mark_reconciled(&self, id: &SubscriptionId, at: Timestamp) -> Result<(), DomainError> {
        let result = sqlx::query("UPDATE subscriptions SET last_reconciled_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::database(format!("Failed to mark reconciled: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(ErrorCode::SubscriptionNotFound, id.to_string()));
        }
        Ok(())
    }
}
