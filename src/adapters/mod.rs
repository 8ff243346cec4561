//! Adapters - Implementations of port interfaces.
//!
//! - `http` - axum routes for subscribers and PayPal webhooks
//! - `memory` - in-memory repository for tests and local development
//! - `paypal` - PayPal REST gateway and webhook verification
//! - `postgres` - PostgreSQL repository

pub mod http;
pub mod memory;
pub mod paypal;
pub mod postgres;
