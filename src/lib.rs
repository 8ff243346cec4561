//! SoulDream Billing - PayPal subscription lifecycle service
//!
//! Keeps a local subscription record per user in step with PayPal. User
//! actions, signed webhooks and reconciliation reads all flow through one
//! reconciler that decides each transition, and every accepted transition is
//! written together with an audit event under a version check. Paid-feature
//! access is answered from the local record alone.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
