//! Lifecycle tuning: entitlement grace, approval window, webhook deadline
//! and background jobs.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Access granted while a new subscription awaits approval; 0 disables it.
    #[serde(default)]
    pub pending_grace_minutes: u32,

    /// How long a signup may await approval before an unreadable provider
    /// no longer keeps it open
    #[serde(default = "default_approval_window")]
    pub approval_window_minutes: u32,

    /// Deadline for processing one webhook delivery
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_ms: u64,

    /// Period-end sweep interval; 0 disables the sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Scheduled reconciliation read interval; 0 disables it
    #[serde(default)]
    pub reconcile_interval_secs: u64,

    /// Records examined per background pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl BillingConfig {
    pub fn approval_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.approval_window_minutes))
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        non_zero_secs(self.sweep_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        non_zero_secs(self.reconcile_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(100..=30_000).contains(&self.webhook_timeout_ms) {
            return Err(ValidationError::InvalidWebhookTimeout);
        }
        if self.approval_window_minutes == 0 {
            return Err(ValidationError::InvalidApprovalWindow);
        }
        if self.batch_size == 0 {
            return Err(ValidationError::MissingRequired("BILLING__BATCH_SIZE"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            pending_grace_minutes: 0,
            approval_window_minutes: default_approval_window(),
            webhook_timeout_ms: default_webhook_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            reconcile_interval_secs: 0,
            batch_size: default_batch_size(),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn default_approval_window() -> u32 {
    180
}

fn default_webhook_timeout() -> u64 {
    5_000
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_batch_size() -> u32 {
    100
}
