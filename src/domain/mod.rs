//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `subscription` - Subscription lifecycle, reconciler and entitlement
//! - `webhook` - Provider webhook vocabulary and verification
//!
//! Nothing in here performs I/O.

pub mod foundation;
pub mod subscription;
pub mod webhook;
