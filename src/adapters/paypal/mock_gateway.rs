//! Mock payment gateway for testing.
//!
//! Keeps an in-memory picture of the provider's subscriptions so tests can
//! drive user actions, then read back what the provider "saw". Supports:
//! - Error injection, per call or per method
//! - Failures after the provider already applied the change (lost responses)
//! - Call tracking

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::BillingPeriod;
use crate::ports::{
    CreateSubscriptionRequest, CreatedSubscription, GatewayError, PaymentGateway,
    RemoteSubscription,
};

/// Mock payment gateway for testing.
///
/// # Example
///
/// ```ignore
/// let gateway = MockPaymentGateway::new();
/// gateway.set_method_error("cancel", GatewayError::unavailable("down"));
/// let result = gateway.cancel("I-MOCK1", "reason").await;
/// ```
#[derive(Default)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Provider-side subscriptions by id.
    remote: HashMap<String, RemoteSubscription>,

    /// Counter for generated provider ids.
    created: u32,

    /// Error to return on next call.
    next_error: Option<GatewayError>,

    /// Specific errors by method name.
    method_errors: HashMap<String, GatewayError>,

    /// Methods whose error is returned after the change was applied.
    apply_before_error: HashSet<String>,

    call_log: Vec<MethodCall>,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add or replace a provider-side subscription.
    pub fn set_remote(&self, remote: RemoteSubscription) {
        let id = remote.provider_subscription_id.clone();
        self.inner.lock().unwrap().remote.insert(id, remote);
    }

    /// Change the provider-side status, as if it happened at PayPal.
    pub fn set_remote_status(&self, provider_subscription_id: &str, status: &str) {
        let mut state = self.inner.lock().unwrap();
        let remote = state
            .remote
            .entry(provider_subscription_id.to_string())
            .or_insert_with(|| blank_remote(provider_subscription_id));
        remote.status = status.to_string();
        remote.status_updated_at = Some(Timestamp::now());
    }

    /// Set the billing period PayPal reports for a subscription.
    pub fn set_remote_period(&self, provider_subscription_id: &str, period: BillingPeriod) {
        let mut state = self.inner.lock().unwrap();
        if let Some(remote) = state.remote.get_mut(provider_subscription_id) {
            remote.period = Some(period);
        }
    }

    /// Forget a subscription; later reads of it return `NotFound`.
    pub fn remove_remote(&self, provider_subscription_id: &str) {
        self.inner.lock().unwrap().remote.remove(provider_subscription_id);
    }

    pub fn remote(&self, provider_subscription_id: &str) -> Option<RemoteSubscription> {
        self.inner
            .lock()
            .unwrap()
            .remote
            .get(provider_subscription_id)
            .cloned()
    }

    /// Set an error to return on the next call to any method.
    pub fn set_error(&self, error: GatewayError) {
        self.inner.lock().unwrap().next_error = Some(error);
    }

    /// Set an error for a specific method.
    pub fn set_method_error(&self, method: &str, error: GatewayError) {
        self.inner
            .lock()
            .unwrap()
            .method_errors
            .insert(method.to_string(), error);
    }

    /// Apply `method`'s change at the provider, then fail with `error`.
    pub fn fail_after_applying(&self, method: &str, error: GatewayError) {
        let mut state = self.inner.lock().unwrap();
        state.method_errors.insert(method.to_string(), error);
        state.apply_before_error.insert(method.to_string());
    }

    /// Clear all configured errors.
    pub fn clear_errors(&self) {
        let mut state = self.inner.lock().unwrap();
        state.next_error = None;
        state.method_errors.clear();
        state.apply_before_error.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.inner.lock().unwrap().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().call_log.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    fn record_call(&self, method: &str, args: Vec<String>) {
        self.inner.lock().unwrap().call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
    }

    /// Returns the configured error and whether the change should still
    /// be applied.
    fn pending_error(&self, method: &str) -> (Option<GatewayError>, bool) {
        let mut state = self.inner.lock().unwrap();

        if let Some(error) = state.method_errors.get(method) {
            let applied = state.apply_before_error.contains(method);
            return (Some(error.clone()), applied);
        }

        (state.next_error.take(), false)
    }

    fn change_status(
        &self,
        method: &str,
        provider_subscription_id: &str,
        status: &str,
    ) -> Result<(), GatewayError> {
        let (error, apply_anyway) = self.pending_error(method);
        if error.is_none() || apply_anyway {
            let mut state = self.inner.lock().unwrap();
            let remote = state
                .remote
                .get_mut(provider_subscription_id)
                .ok_or_else(|| GatewayError::not_found("subscription"))?;
            remote.status = status.to_string();
            remote.status_updated_at = Some(Timestamp::now());
        }
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Clone for MockPaymentGateway {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn blank_remote(provider_subscription_id: &str) -> RemoteSubscription {
    RemoteSubscription {
        provider_subscription_id: provider_subscription_id.to_string(),
        status: "APPROVAL_PENDING".to_string(),
        plan_id: None,
        period: None,
        status_updated_at: None,
        status_change_note: None,
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<CreatedSubscription, GatewayError> {
        self.record_call(
            "create_subscription",
            vec![request.plan_id.clone(), request.local_reference.clone()],
        );

        let (error, apply_anyway) = self.pending_error("create_subscription");
        let mut created = None;
        if error.is_none() || apply_anyway {
            let mut state = self.inner.lock().unwrap();
            state.created += 1;
            let id = format!("I-MOCK{}", state.created);
            let mut remote = blank_remote(&id);
            remote.plan_id = Some(request.plan_id.clone());
            remote.status_updated_at = Some(Timestamp::now());
            state.remote.insert(id.clone(), remote);
            created = Some(CreatedSubscription {
                approval_url: Some(format!(
                    "https://www.sandbox.paypal.com/webapps/billing/subscriptions?ba_token=BA-{}",
                    id
                )),
                status: "APPROVAL_PENDING".to_string(),
                provider_subscription_id: id,
            });
        }

        match (error, created) {
            (Some(error), _) => Err(error),
            (None, Some(created)) => Ok(created),
            (None, None) => Err(GatewayError::unavailable("mock produced no subscription")),
        }
    }

    async fn cancel(&self, provider_subscription_id: &str, reason: &str) -> Result<(), GatewayError> {
        self.record_call(
            "cancel",
            vec![provider_subscription_id.to_string(), reason.to_string()],
        );
        self.change_status("cancel", provider_subscription_id, "CANCELLED")
    }

    async fn suspend(
        &self,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.record_call(
            "suspend",
            vec![provider_subscription_id.to_string(), reason.to_string()],
        );
        self.change_status("suspend", provider_subscription_id, "SUSPENDED")
    }

    async fn reactivate(
        &self,
        provider_subscription_id: &str,
        reason: &str,
    ) -> Result<(), GatewayError> {
        self.record_call(
            "reactivate",
            vec![provider_subscription_id.to_string(), reason.to_string()],
        );
        self.change_status("reactivate", provider_subscription_id, "ACTIVE")
    }

    async fn fetch_detail(
        &self,
        provider_subscription_id: &str,
    ) -> Result<RemoteSubscription, GatewayError> {
        self.record_call("fetch_detail", vec![provider_subscription_id.to_string()]);
        if let (Some(error), _) = self.pending_error("fetch_detail") {
            return Err(error);
        }

        self.inner
            .lock()
            .unwrap()
            .remote
            .get(provider_subscription_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("subscription"))
    }
}
