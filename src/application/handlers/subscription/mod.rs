//! Subscription handlers - Commands and queries for the subscription lifecycle.
//!
//! ## Commands
//! - `SubscribeHandler` - Start a subscription and hand back the approval link
//! - `AbandonSignupHandler` - Close a signup the subscriber never approved
//! - `CancelSubscriptionHandler` - Cancel at period end
//! - `SuspendSubscriptionHandler` / `ReactivateSubscriptionHandler` - Pause and resume
//! - `ReconcileSubscriptionHandler` - Refresh from the provider (return flow, schedule)
//! - `IngestWebhookHandler` - Verified provider notifications
//! - `ExpireElapsedHandler` - Finish cancellations whose period ended
//!
//! ## Queries
//! - `GetSubscriptionHandler` / `GetSubscriptionHistoryHandler`
//! - `CheckEntitlementHandler`
//!
//! Every status change goes through `TransitionCommitter`.

mod abandon_signup;
mod cancel;
mod check_entitlement;
mod commit;
mod expire_elapsed;
mod get_subscription;
mod ingest_webhook;
mod reactivate;
mod reconcile;
mod subscribe;
mod suspend;
mod user_action;

#[cfg(test)]
mod test_support;

pub use abandon_signup::{
    AbandonSignupCommand, AbandonSignupHandler, DEFAULT_APPROVAL_WINDOW_MINUTES,
};
pub use cancel::{CancelSubscriptionCommand, CancelSubscriptionHandler};
pub use check_entitlement::{CheckEntitlementHandler, CheckEntitlementQuery, CheckEntitlementResult};
pub use commit::{ArrivalSequence, CancellationInFlight, CommitOutcome, TransitionCommitter};
pub use expire_elapsed::{ExpireElapsedHandler, SweepReport};
pub use get_subscription::{
    GetSubscriptionHandler, GetSubscriptionHistoryHandler, GetSubscriptionHistoryQuery,
    GetSubscriptionQuery,
};
pub use ingest_webhook::{IngestWebhookCommand, IngestWebhookHandler, WebhookOutcome};
pub use reactivate::{ReactivateSubscriptionCommand, ReactivateSubscriptionHandler};
pub use reconcile::{
    ReconcileReport, ReconcileResult, ReconcileSubscriptionCommand, ReconcileSubscriptionHandler,
};
pub use subscribe::{SubscribeCommand, SubscribeHandler, SubscribeResult};
pub use suspend::{SuspendSubscriptionCommand, SuspendSubscriptionHandler};
