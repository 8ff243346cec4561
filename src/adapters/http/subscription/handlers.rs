//! HTTP handlers for subscription endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Json, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::application::handlers::subscription::{
    AbandonSignupCommand, AbandonSignupHandler, CancelSubscriptionCommand, CancelSubscriptionHandler, CheckEntitlementHandler,
    CheckEntitlementQuery, GetSubscriptionHandler, GetSubscriptionHistoryHandler,
    GetSubscriptionHistoryQuery, GetSubscriptionQuery, IngestWebhookCommand, IngestWebhookHandler,
    ReactivateSubscriptionCommand, ReactivateSubscriptionHandler, ReconcileSubscriptionCommand,
    ReconcileSubscriptionHandler, SubscribeCommand, SubscribeHandler, SuspendSubscriptionCommand,
    SuspendSubscriptionHandler, TransitionCommitter,
};
use crate::domain::foundation::UserId;
use crate::domain::subscription::{EntitlementGate, SubscriptionError, UserMessage};
use crate::domain::webhook::{TransmissionHeaders, WebhookError};
use crate::ports::{PaymentGateway, Subscriber, SubscriptionRepository, WebhookSignatureVerifier};

use super::dto::{
    ActionResponse, EntitlementResponse, ErrorResponse, HistoryParams, HistoryResponse,
    SubscribeRequest, SubscribeResponse, SubscriptionActionRequest, SubscriptionResponse,
    WebhookAck,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned per request; every dependency is behind an `Arc`. The committer
/// is shared so arrival sequence numbers stay unique across requests.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub repository: Arc<dyn SubscriptionRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub verifier: Arc<dyn WebhookSignatureVerifier>,
    pub committer: Arc<TransitionCommitter>,
    pub entitlement_gate: EntitlementGate,
    pub webhook_timeout: Duration,
    pub approval_window: chrono::Duration,
}

impl SubscriptionAppState {
    pub fn subscribe_handler(&self) -> SubscribeHandler {
        SubscribeHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
        .with_approval_window(self.approval_window)
    }

    pub fn abandon_handler(&self) -> AbandonSignupHandler {
        AbandonSignupHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
        .with_approval_window(self.approval_window)
    }

    pub fn cancel_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
    }

    pub fn suspend_handler(&self) -> SuspendSubscriptionHandler {
        SuspendSubscriptionHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
    }

    pub fn reactivate_handler(&self) -> ReactivateSubscriptionHandler {
        ReactivateSubscriptionHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
    }

    pub fn reconcile_handler(&self) -> ReconcileSubscriptionHandler {
        ReconcileSubscriptionHandler::new(
            self.repository.clone(),
            self.gateway.clone(),
            self.committer.clone(),
        )
    }

    pub fn get_subscription_handler(&self) -> GetSubscriptionHandler {
        GetSubscriptionHandler::new(self.repository.clone())
    }

    pub fn history_handler(&self) -> GetSubscriptionHistoryHandler {
        GetSubscriptionHistoryHandler::new(self.repository.clone())
    }

    pub fn entitlement_handler(&self) -> CheckEntitlementHandler {
        CheckEntitlementHandler::new(self.repository.clone(), self.entitlement_gate)
    }

    pub fn webhook_handler(&self) -> IngestWebhookHandler {
        IngestWebhookHandler::new(
            self.verifier.clone(),
            self.repository.clone(),
            self.committer.clone(),
            self.webhook_timeout,
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// Caller identity, set by the gateway in front of this service.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s).ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/subscriptions/current - The caller's subscription
pub async fn get_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .get_subscription_handler()
        .handle(GetSubscriptionQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(SubscriptionResponse {
        subscription: result.map(Into::into),
    }))
}

/// GET /api/subscriptions/entitlement - Whether the caller has paid access
pub async fn check_entitlement(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .entitlement_handler()
        .handle(CheckEntitlementQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(EntitlementResponse::from(result)))
}

/// GET /api/subscriptions/history - Audit events, newest first
pub async fn get_history(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let events = state
        .history_handler()
        .handle(GetSubscriptionHistoryQuery {
            user_id: user.user_id,
            limit: params
                .limit
                .unwrap_or(GetSubscriptionHistoryQuery::DEFAULT_LIMIT),
        })
        .await?;

    Ok(Json(HistoryResponse {
        events: events.into_iter().map(Into::into).collect(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/subscriptions - Start a subscription
pub async fn subscribe(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .subscribe_handler()
        .handle(SubscribeCommand {
            user_id: user.user_id,
            plan_id: request.plan_id,
            subscriber: Subscriber {
                email: request.email,
                given_name: request.given_name,
                surname: request.surname,
            },
        })
        .await?;

    Ok((StatusCode::CREATED, Json(SubscribeResponse::from(result))))
}

/// POST /api/subscriptions/cancel - Cancel at period end
pub async fn cancel_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    body: Option<Json<SubscriptionActionRequest>>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let outcome = state
        .cancel_handler()
        .handle(CancelSubscriptionCommand {
            user_id: user.user_id,
            reason: reason_of(body),
        })
        .await?;

    Ok(Json(ActionResponse::from(outcome)))
}

/// POST /api/subscriptions/suspend - Pause billing and access
pub async fn suspend_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    body: Option<Json<SubscriptionActionRequest>>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let outcome = state
        .suspend_handler()
        .handle(SuspendSubscriptionCommand {
            user_id: user.user_id,
            reason: reason_of(body),
        })
        .await?;

    Ok(Json(ActionResponse::from(outcome)))
}

/// POST /api/subscriptions/reactivate - Resume a suspended subscription
pub async fn reactivate_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    body: Option<Json<SubscriptionActionRequest>>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let outcome = state
        .reactivate_handler()
        .handle(ReactivateSubscriptionCommand {
            user_id: user.user_id,
            reason: reason_of(body),
        })
        .await?;

    Ok(Json(ActionResponse::from(outcome)))
}

/// POST /api/subscriptions/reconcile - Refresh from PayPal after the approval redirect
pub async fn reconcile_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .reconcile_handler()
        .handle(ReconcileSubscriptionCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(ActionResponse::from(result)))
}

/// POST /api/subscriptions/abandon - Subscriber left PayPal without approving
pub async fn abandon_signup(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let result = state
        .abandon_handler()
        .handle(AbandonSignupCommand {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(ActionResponse::from(result)))
}

fn reason_of(body: Option<Json<SubscriptionActionRequest>>) -> Option<String> {
    body.and_then(|Json(request)| request.reason)
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/paypal - PayPal webhook deliveries
pub async fn handle_paypal_webhook(
    State(state): State<SubscriptionAppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WebhookApiError> {
    let transmission =
        TransmissionHeaders::from_lookup(|name| headers.get(name).and_then(|v| v.to_str().ok()))
            .map_err(|err| {
                tracing::warn!(error = %err, "Webhook rejected before verification");
                err
            })?;

    let outcome = state
        .webhook_handler()
        .handle(IngestWebhookCommand {
            headers: transmission,
            body: body.to_vec(),
        })
        .await?;

    Ok((StatusCode::OK, Json(WebhookAck::from(outcome))))
}

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts subscription errors to HTTP responses.
#[derive(Debug)]
pub struct SubscriptionApiError(SubscriptionError);

impl From<SubscriptionError> for SubscriptionApiError {
    fn from(err: SubscriptionError) -> Self {
        Self(err)
    }
}

impl SubscriptionApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SubscriptionError::AuthenticationFailure(_) | SubscriptionError::ProviderRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            SubscriptionError::InvalidTransition { .. }
            | SubscriptionError::StaleWrite
            | SubscriptionError::AlreadySubscribed(_) => StatusCode::CONFLICT,
            SubscriptionError::DuplicateEvent => StatusCode::OK,
            SubscriptionError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SubscriptionError::Unconfirmed(_) => StatusCode::ACCEPTED,
            SubscriptionError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            SubscriptionError::NotFound(_) => StatusCode::NOT_FOUND,
            SubscriptionError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            SubscriptionError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            tracing::error!(error_code = self.0.code(), error = %self.0, "Subscription request failed");
        }

        let message = match &self.0 {
            SubscriptionError::ValidationFailed { .. } => self.0.message(),
            other => other.user_message().as_str().to_string(),
        };
        (status, Json(ErrorResponse::new(self.0.code(), message))).into_response()
    }
}

/// Webhook error response; the status code drives PayPal's redelivery.
#[derive(Debug)]
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let code = match &self.0 {
            WebhookError::InvalidSignature
            | WebhookError::MissingHeader(_)
            | WebhookError::TimestampOutOfRange => "SIGNATURE_INVALID",
            WebhookError::ParseError(_) | WebhookError::MissingField(_) => "MALFORMED_PAYLOAD",
            WebhookError::InvalidTransition(_) => "INVALID_TRANSITION",
            WebhookError::Ignored(_) => "IGNORED",
            WebhookError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            WebhookError::VerifierUnavailable(_) => "VERIFIER_UNAVAILABLE",
            WebhookError::StaleWrite => "STALE_WRITE",
            WebhookError::Timeout => "TIMEOUT",
            WebhookError::Database(_) => "INTERNAL_ERROR",
        };
        let body = ErrorResponse::new(code, UserMessage::TryAgain.as_str());
        (self.0.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: SubscriptionError) -> StatusCode {
        SubscriptionApiError::from(err).status_code()
    }

    #[test]
    fn error_statuses_follow_taxonomy() {
        assert_eq!(
            status_of(SubscriptionError::invalid_transition("pending_approval", "cancel_requested")),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(SubscriptionError::StaleWrite), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SubscriptionError::provider_unavailable("503")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_of(SubscriptionError::unconfirmed("timeout")), StatusCode::ACCEPTED);
        assert_eq!(
            status_of(SubscriptionError::authentication_failure("401")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_of(SubscriptionError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(SubscriptionError::validation("plan_id", "required")),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn error_body_uses_subscriber_message() {
        let response =
            SubscriptionApiError::from(SubscriptionError::unconfirmed("read timed out"))
                .into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["error_code"], "UNCONFIRMED");
        assert_eq!(json["message"], UserMessage::Unconfirmed.as_str());
    }
}
