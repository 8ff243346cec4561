//! Axum router configuration for subscription endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    abandon_signup, cancel_subscription, check_entitlement, get_history, get_subscription,
    handle_paypal_webhook, health, reactivate_subscription, reconcile_subscription, subscribe,
    suspend_subscription, SubscriptionAppState,
};

/// Create the subscription API router.
///
/// # Routes
///
/// ## User Endpoints (require `X-User-Id`)
/// - `POST /` - Start a subscription
/// - `GET /current` - Current subscription
/// - `GET /entitlement` - Paid-access check
/// - `GET /history` - Audit events
/// - `POST /cancel`, `POST /suspend`, `POST /reactivate` - Lifecycle actions
/// - `POST /reconcile` - Refresh from PayPal
/// - `POST /abandon` - Close a signup left at PayPal without approval
pub fn subscription_routes() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/", post(subscribe))
        .route("/current", get(get_subscription))
        .route("/entitlement", get(check_entitlement))
        .route("/history", get(get_history))
        .route("/cancel", post(cancel_subscription))
        .route("/suspend", post(suspend_subscription))
        .route("/reactivate", post(reactivate_subscription))
        .route("/reconcile", post(reconcile_subscription))
        .route("/abandon", post(abandon_signup))
}

/// Create the webhook router.
///
/// No user authentication; deliveries are verified by signature.
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/paypal", post(handle_paypal_webhook))
}

/// Create the complete service router, mounted at `/api`, with `/health`.
pub fn subscription_router() -> Router<SubscriptionAppState> {
    Router::new()
        .nest("/api/subscriptions", subscription_routes())
        .nest("/api/webhooks", webhook_routes())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::memory::InMemorySubscriptionRepository;
    use crate::adapters::paypal::MockPaymentGateway;
    use crate::application::handlers::subscription::TransitionCommitter;
    use crate::domain::foundation::Timestamp;
    use crate::domain::subscription::{EntitlementGate, Reconciler};
    use crate::domain::webhook::{
        sign_transmission, SharedSecretVerifier, HEADER_TRANSMISSION_ID,
        HEADER_TRANSMISSION_SIG, HEADER_TRANSMISSION_TIME,
    };

    // ════════════════════════════════════════════════════════════════════════════
    // Test Helpers
    // ════════════════════════════════════════════════════════════════════════════

    const SECRET: &str = "route-secret";
    const WEBHOOK_ID: &str = "WH-ROUTES";

    struct TestApp {
        router: Router,
        gateway: MockPaymentGateway,
    }

    fn app() -> TestApp {
        let repository = Arc::new(InMemorySubscriptionRepository::new());
        let gateway = MockPaymentGateway::new();
        let state = SubscriptionAppState {
            repository: repository.clone(),
            gateway: Arc::new(gateway.clone()),
            verifier: Arc::new(SharedSecretVerifier::new(
                SecretString::new(SECRET.to_string()),
                WEBHOOK_ID,
            )),
            committer: Arc::new(TransitionCommitter::new(repository, Reconciler::default())),
            entitlement_gate: EntitlementGate::default(),
            webhook_timeout: Duration::from_secs(5),
            approval_window: chrono::Duration::hours(3),
        };
        TestApp {
            router: subscription_router().with_state(state),
            gateway,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn user_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-User-Id", "user-1");
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn webhook_request(body: Value) -> Request<Body> {
        let body = body.to_string();
        let sent = Timestamp::now().to_rfc3339();
        let sig = sign_transmission(SECRET, WEBHOOK_ID, "tx-r", &sent, body.as_bytes()).unwrap();
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/paypal")
            .header("content-type", "application/json")
            .header(HEADER_TRANSMISSION_ID, "tx-r")
            .header(HEADER_TRANSMISSION_TIME, sent)
            .header(HEADER_TRANSMISSION_SIG, sig)
            .body(Body::from(body))
            .unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Route Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let (status, json) = send(
            &app.router,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn user_routes_require_identity() {
        let app = app();
        let (status, json) = send(
            &app.router,
            Request::builder()
                .uri("/api/subscriptions/current")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error_code"], "AUTHENTICATION_REQUIRED");
    }

    #[tokio::test]
    async fn subscribe_then_activate_by_webhook_grants_entitlement() {
        let app = app();

        let (status, created) = send(
            &app.router,
            user_request("POST", "/api/subscriptions", Some(json!({ "plan_id": "P-PLAN" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["subscription"]["status"], "pending_approval");
        assert!(created["approval_url"].is_string());
        let provider_id = created["subscription"]["provider_subscription_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, ack) = send(
            &app.router,
            webhook_request(json!({
                "id": "WH-ROUTE-1",
                "event_type": "BILLING.SUBSCRIPTION.ACTIVATED",
                "resource": { "id": provider_id, "status": "ACTIVE" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["outcome"], "processed");

        let (_, entitlement) = send(
            &app.router,
            user_request("GET", "/api/subscriptions/entitlement", None),
        )
        .await;
        assert_eq!(entitlement["entitled"], true);
        assert_eq!(entitlement["status"], "active");
    }

    #[tokio::test]
    async fn illegal_action_is_conflict_with_fixed_message() {
        let app = app();
        send(
            &app.router,
            user_request("POST", "/api/subscriptions", Some(json!({ "plan_id": "P-PLAN" }))),
        )
        .await;

        let (status, json) = send(
            &app.router,
            user_request("POST", "/api/subscriptions/suspend", None),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error_code"], "INVALID_TRANSITION");
        assert_eq!(
            json["message"],
            "This action is not valid for your current subscription state."
        );
        assert!(!app.gateway.was_called("suspend"));
    }

    #[tokio::test]
    async fn webhook_without_signature_headers_is_unauthorized() {
        let app = app();
        let (status, json) = send(
            &app.router,
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/paypal")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error_code"], "SIGNATURE_INVALID");
    }

    #[tokio::test]
    async fn webhook_with_unreadable_transmission_time_is_unauthorized() {
        let app = app();
        let body = json!({ "id": "WH-ROUTE-3" }).to_string();
        let sig =
            sign_transmission(SECRET, WEBHOOK_ID, "tx-r", "yesterday", body.as_bytes()).unwrap();
        let (status, json) = send(
            &app.router,
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/paypal")
                .header(HEADER_TRANSMISSION_ID, "tx-r")
                .header(HEADER_TRANSMISSION_TIME, "yesterday")
                .header(HEADER_TRANSMISSION_SIG, sig)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error_code"], "SIGNATURE_INVALID");
    }

    #[tokio::test]
    async fn abandoned_approval_lets_user_subscribe_again() {
        let app = app();
        let (_, first) = send(
            &app.router,
            user_request("POST", "/api/subscriptions", Some(json!({ "plan_id": "P-PLAN" }))),
        )
        .await;

        let (status, abandoned) = send(
            &app.router,
            user_request("POST", "/api/subscriptions/abandon", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(abandoned["changed"], true);
        assert_eq!(abandoned["subscription"]["status"], "expired");

        let (status, second) = send(
            &app.router,
            user_request("POST", "/api/subscriptions", Some(json!({ "plan_id": "P-PLAN" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_ne!(second["subscription"]["id"], first["subscription"]["id"]);
    }

    #[tokio::test]
    async fn webhook_for_unknown_subscription_asks_for_redelivery() {
        let app = app();
        let (status, _) = send(
            &app.router,
            webhook_request(json!({
                "id": "WH-ROUTE-2",
                "event_type": "BILLING.SUBSCRIPTION.CANCELLED",
                "resource": { "id": "I-NOPE" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let app = app();
        send(
            &app.router,
            user_request("POST", "/api/subscriptions", Some(json!({ "plan_id": "P-PLAN" }))),
        )
        .await;

        let (status, json) = send(
            &app.router,
            user_request("GET", "/api/subscriptions/history?limit=10", None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let events = json["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "provider_linked");
    }

    #[tokio::test]
    async fn missing_subscription_is_null_not_error() {
        let app = app();
        let (status, json) = send(
            &app.router,
            user_request("GET", "/api/subscriptions/current", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["subscription"].is_null());
    }
}
