//! HTTP adapter for subscription endpoints.
//!
//! - `POST /api/subscriptions` - Start a subscription
//! - `GET /api/subscriptions/current` - Current subscription
//! - `GET /api/subscriptions/entitlement` - Paid-access check
//! - `GET /api/subscriptions/history` - Audit events
//! - `POST /api/subscriptions/{cancel,suspend,reactivate}` - Lifecycle actions
//! - `POST /api/subscriptions/reconcile` - Refresh from PayPal
//! - `POST /api/webhooks/paypal` - PayPal webhooks

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{AuthenticatedUser, SubscriptionApiError, SubscriptionAppState, WebhookApiError};
pub use routes::{subscription_router, subscription_routes, webhook_routes};
