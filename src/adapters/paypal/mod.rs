//! PayPal adapters.
//!
//! - `PayPalGateway` - REST client implementing `PaymentGateway`
//! - `PostbackVerifier` - webhook verification through PayPal's API
//! - `MockPaymentGateway` - in-memory gateway for tests

mod api_types;
mod client;
mod mock_gateway;
mod postback_verifier;
mod retry;

pub use client::{PayPalConfig, PayPalGateway, PayPalMode};
pub use mock_gateway::{MethodCall, MockPaymentGateway};
pub use postback_verifier::PostbackVerifier;
pub use retry::{retry_idempotent, RetryPolicy};
