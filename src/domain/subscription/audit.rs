//! Append-only audit log entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use super::{EventSource, SubscriptionStatus};
use crate::domain::foundation::{SubscriptionEventId, SubscriptionId, Timestamp};

/// Hex-encoded SHA-256 digest identifying the payload behind an event.
///
/// Unique per subscription; a second event carrying the same digest is a
/// duplicate delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadDigest(String);

impl PayloadDigest {
    /// Digest of arbitrary bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Digest of a provider-assigned event identifier.
    pub fn of_provider_event(event_id: &str) -> Self {
        Self::of_bytes(format!("provider-event:{}", event_id).as_bytes())
    }

    /// A digest that collides with nothing; used for user actions.
    pub fn random() -> Self {
        Self::of_bytes(Uuid::new_v4().as_bytes())
    }

    /// Wraps a digest loaded from storage.
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row per accepted change to a subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: SubscriptionEventId,
    pub subscription_id: SubscriptionId,
    pub event_type: String,
    pub occurred_at: Timestamp,
    pub recorded_at: Timestamp,
    pub source: EventSource,
    pub payload_digest: PayloadDigest,
    pub resulting_status: SubscriptionStatus,
    /// Record version written together with this event.
    pub version: u64,
}

impl SubscriptionEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscription_id: SubscriptionId,
        event_type: impl Into<String>,
        occurred_at: Timestamp,
        recorded_at: Timestamp,
        source: EventSource,
        payload_digest: PayloadDigest,
        resulting_status: SubscriptionStatus,
        version: u64,
    ) -> Self {
        Self {
            id: SubscriptionEventId::new(),
            subscription_id,
            event_type: event_type.into(),
            occurred_at,
            recorded_at,
            source,
            payload_digest,
            resulting_status,
            version,
        }
    }
}
