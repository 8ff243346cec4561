//! PostgreSQL adapters.
//!
//! - `PostgresSubscriptionRepository` - subscription records and the audit log

mod subscription_repository;

pub use subscription_repository::PostgresSubscriptionRepository;
