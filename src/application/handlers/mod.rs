//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

pub mod subscription;

pub use subscription::{
    // Commands
    CancelSubscriptionCommand, CancelSubscriptionHandler, ExpireElapsedHandler,
    IngestWebhookCommand, IngestWebhookHandler, ReactivateSubscriptionCommand,
    ReactivateSubscriptionHandler, ReconcileSubscriptionCommand, ReconcileSubscriptionHandler,
    SubscribeCommand, SubscribeHandler, SuspendSubscriptionCommand, SuspendSubscriptionHandler,
    // Queries
    CheckEntitlementHandler, CheckEntitlementQuery, GetSubscriptionHandler,
    GetSubscriptionHistoryHandler, GetSubscriptionHistoryQuery, GetSubscriptionQuery,
    // Results and shared pieces
    CheckEntitlementResult, CommitOutcome, ReconcileReport, ReconcileResult, SubscribeResult,
    SweepReport, TransitionCommitter, WebhookOutcome,
};
