//! PayPal REST API wire types.
//!
//! Request and response shapes for the OAuth token endpoint, the
//! Subscriptions v1 API and the webhook signature verification endpoint.

use serde::{Deserialize, Serialize};

use crate::domain::webhook::SubscriptionResource;
use crate::ports::{CreateSubscriptionRequest, RemoteSubscription};

/// `POST /v1/oauth2/token` response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// `POST /v1/billing/subscriptions` body.
#[derive(Debug, Serialize)]
pub struct CreateSubscriptionBody {
    pub plan_id: String,
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<SubscriberBody>,
    pub application_context: ApplicationContext,
}

#[derive(Debug, Serialize)]
pub struct SubscriberBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<SubscriberName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriberName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApplicationContext {
    pub brand_name: String,
    pub user_action: &'static str,
    pub shipping_preference: &'static str,
    pub return_url: String,
    pub cancel_url: String,
}

impl CreateSubscriptionBody {
    pub fn from_request(
        request: &CreateSubscriptionRequest,
        brand_name: &str,
        return_url: &str,
        cancel_url: &str,
    ) -> Self {
        let subscriber = &request.subscriber;
        let name = (subscriber.given_name.is_some() || subscriber.surname.is_some()).then(|| {
            SubscriberName {
                given_name: subscriber.given_name.clone(),
                surname: subscriber.surname.clone(),
            }
        });
        let subscriber = (name.is_some() || subscriber.email.is_some()).then(|| SubscriberBody {
            name,
            email_address: subscriber.email.clone(),
        });

        Self {
            plan_id: request.plan_id.clone(),
            custom_id: request.local_reference.clone(),
            subscriber,
            application_context: ApplicationContext {
                brand_name: brand_name.to_string(),
                user_action: "SUBSCRIBE_NOW",
                shipping_preference: "NO_SHIPPING",
                return_url: return_url.to_string(),
                cancel_url: cancel_url.to_string(),
            },
        }
    }
}

/// HATEOAS link in PayPal responses.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(default)]
    pub method: Option<String>,
}

/// Subscription as returned by create and detail calls.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionResponse {
    #[serde(flatten)]
    pub resource: SubscriptionResource,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl SubscriptionResponse {
    /// The subscriber approval link.
    pub fn approval_url(&self) -> Option<String> {
        self.links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone())
    }

    pub fn status(&self) -> String {
        self.resource.status.clone().unwrap_or_default()
    }

    pub fn into_remote(self) -> RemoteSubscription {
        let period = self.resource.billing_period();
        let status_updated_at = self.resource.status_updated_at();
        RemoteSubscription {
            provider_subscription_id: self.resource.id,
            status: self.resource.status.unwrap_or_default(),
            plan_id: self.resource.plan_id,
            period,
            status_updated_at,
            status_change_note: self.resource.status_change_note,
        }
    }
}

/// `{ "reason": ... }` body for cancel, suspend and activate.
#[derive(Debug, Serialize)]
pub struct ReasonBody<'a> {
    pub reason: &'a str,
}

/// PayPal error body.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
    /// OAuth endpoint errors use this shape instead.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ErrorBody {
    pub fn code(&self) -> Option<String> {
        self.details
            .iter()
            .find_map(|d| d.issue.clone())
            .or_else(|| self.name.clone())
            .or_else(|| self.error.clone())
    }

    pub fn describe(&self) -> String {
        self.details
            .iter()
            .find_map(|d| d.description.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
            .unwrap_or_else(|| "no error description".to_string())
    }
}

/// `POST /v1/notifications/verify-webhook-signature` body.
#[derive(Debug, Serialize)]
pub struct VerifySignatureBody<'a> {
    pub auth_algo: &'a str,
    pub cert_url: &'a str,
    pub transmission_id: &'a str,
    pub transmission_sig: &'a str,
    pub transmission_time: &'a str,
    pub webhook_id: &'a str,
    pub webhook_event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct VerifySignatureResponse {
    pub verification_status: String,
}
