//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `PaymentGateway` - Billing provider REST operations
//! - `SubscriptionRepository` - Subscription records with compare-and-swap and the audit log
//! - `WebhookSignatureVerifier` - Authenticity of provider webhook deliveries

mod payment_gateway;
mod subscription_repository;
mod webhook_signature_verifier;

pub use payment_gateway::{
    CreateSubscriptionRequest, CreatedSubscription, GatewayError, GatewayErrorKind,
    PaymentGateway, RemoteSubscription, Subscriber,
};
pub use subscription_repository::SubscriptionRepository;
pub use webhook_signature_verifier::WebhookSignatureVerifier;
