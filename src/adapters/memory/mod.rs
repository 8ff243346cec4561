//! In-memory adapters for tests and local development.

mod subscription_repository;

pub use subscription_repository::InMemorySubscriptionRepository;
