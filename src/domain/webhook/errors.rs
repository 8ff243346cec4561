//! Webhook error types for PayPal webhook handling.
//!
//! Status codes drive the provider's redelivery policy:
//! - 2xx: acknowledged, never redelivered
//! - 4xx: rejected, retrying cannot help
//! - 5xx: transient, the provider redelivers later

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur during webhook processing.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature did not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A transmission header needed for verification is absent.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// Transmission time is outside the accepted window.
    #[error("Transmission time out of range")]
    TimestampOutOfRange,

    /// Payload or header could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required field missing from the payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// No local record for the provider subscription (yet).
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Reconciler rejected the event.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Event type carries nothing for the lifecycle (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Remote verification endpoint could not be reached.
    #[error("Signature verifier unavailable: {0}")]
    VerifierUnavailable(String),

    /// Record kept moving under us after the single retry.
    #[error("Concurrent update, retry later")]
    StaleWrite,

    /// Processing exceeded the delivery deadline.
    #[error("Processing timed out")]
    Timeout,

    /// Store operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::SubscriptionNotFound(_) // create response may not be stored yet
                | WebhookError::VerifierUnavailable(_)
                | WebhookError::StaleWrite
                | WebhookError::Timeout
                | WebhookError::Database(_)
        )
    }

    /// Maps the error to the HTTP status returned to the provider.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::MissingHeader(_)
            | WebhookError::TimestampOutOfRange => StatusCode::UNAUTHORIZED,

            WebhookError::ParseError(_) | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,

            WebhookError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,

            WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::SubscriptionNotFound(_)
            | WebhookError::VerifierUnavailable(_)
            | WebhookError::StaleWrite
            | WebhookError::Timeout
            | WebhookError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_are_unauthorized_and_final() {
        for err in [
            WebhookError::InvalidSignature,
            WebhookError::MissingHeader("paypal-transmission-sig"),
            WebhookError::TimestampOutOfRange,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn invalid_transition_is_final() {
        let err = WebhookError::InvalidTransition("suspend from pending_approval".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_failures_ask_for_redelivery() {
        for err in [
            WebhookError::SubscriptionNotFound("I-1".into()),
            WebhookError::VerifierUnavailable("timeout".into()),
            WebhookError::StaleWrite,
            WebhookError::Timeout,
            WebhookError::Database("pool closed".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
            assert!(err.is_retryable(), "{}", err);
        }
    }

    #[test]
    fn ignored_is_acknowledged() {
        let err = WebhookError::Ignored("PAYMENT.SALE.COMPLETED".into());
        assert_eq!(err.status_code(), StatusCode::OK);
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_header_names_the_header() {
        let err = WebhookError::MissingHeader("paypal-transmission-id");
        assert_eq!(err.to_string(), "Missing header: paypal-transmission-id");
    }
}
