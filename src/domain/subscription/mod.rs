//! Subscription domain module.
//!
//! Tracks whether a user currently has paid access and why, keeping a
//! local record consistent with the provider-owned subscription.
//!
//! # Module Structure
//!
//! - `status` - SubscriptionStatus state machine
//! - `aggregate` - Subscription record and metadata
//! - `lifecycle_event` - Internal event vocabulary and provenance
//! - `audit` - Append-only SubscriptionEvent rows and payload digests
//! - `reconciler` - Pure transition decisions
//! - `entitlement` - Read-only access check
//! - `errors` - Error taxonomy and user-facing messages

mod aggregate;
mod audit;
mod entitlement;
mod errors;
mod lifecycle_event;
mod reconciler;
mod status;

pub use aggregate::{Subscription, SubscriptionMetadata};
pub use audit::{PayloadDigest, SubscriptionEvent};
pub use entitlement::{Entitlement, EntitlementGate, NotEntitledReason};
pub use errors::{SubscriptionError, UserMessage};
pub use lifecycle_event::{BillingPeriod, EventSource, IncomingEvent, LifecycleEvent};
pub use reconciler::{
    confirms_requested_cancellation, event_for_provider_status, Decision, NoOpReason,
    Reconciler, Rejection, Transition,
};
pub use status::SubscriptionStatus;
