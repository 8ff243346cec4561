//! Subscription error taxonomy.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | AuthenticationFailure | 502 |
//! | InvalidTransition | 409 |
//! | DuplicateEvent | 200 (acknowledged) |
//! | ProviderUnavailable | 503 |
//! | ProviderRejected | 502 |
//! | Unconfirmed | 202 |
//! | StaleWrite | 409 |
//! | SignatureInvalid | 401 |
//! | NotFound | 404 |
//! | AlreadySubscribed | 409 |
//! | ValidationFailed | 400 |
//! | Infrastructure | 500 |

use crate::domain::foundation::{DomainError, ErrorCode};

use super::Rejection;

/// The three messages a subscriber may ever see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    TryAgain,
    Unconfirmed,
    NotValidForState,
}

impl UserMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMessage::TryAgain => "The action could not be completed, please try again.",
            UserMessage::Unconfirmed => "Your subscription state could not be confirmed yet.",
            UserMessage::NotValidForState => {
                "This action is not valid for your current subscription state."
            }
        }
    }
}

/// Subscription-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Provider rejected our credentials even after a token refresh.
    AuthenticationFailure(String),

    /// Reconciler rejected the transition.
    InvalidTransition { current: String, attempted: String },

    /// The event was already applied.
    DuplicateEvent,

    /// Provider unreachable or failing with 5xx.
    ProviderUnavailable(String),

    /// Provider refused the request (4xx other than authentication).
    ProviderRejected(String),

    /// Provider call timed out; the outcome is unknown.
    Unconfirmed(String),

    /// Record changed underneath the writer, even after one re-read.
    StaleWrite,

    /// Webhook signature verification failed.
    SignatureInvalid,

    NotFound(String),

    /// User already holds a live subscription.
    AlreadySubscribed(String),

    ValidationFailed { field: String, message: String },

    Infrastructure(String),
}

impl SubscriptionError {
    pub fn authentication_failure(message: impl Into<String>) -> Self {
        SubscriptionError::AuthenticationFailure(message.into())
    }

    pub fn invalid_transition(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        SubscriptionError::InvalidTransition {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        SubscriptionError::ProviderUnavailable(message.into())
    }

    pub fn provider_rejected(message: impl Into<String>) -> Self {
        SubscriptionError::ProviderRejected(message.into())
    }

    pub fn unconfirmed(message: impl Into<String>) -> Self {
        SubscriptionError::Unconfirmed(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        SubscriptionError::NotFound(what.into())
    }

    pub fn already_subscribed(user_id: impl Into<String>) -> Self {
        SubscriptionError::AlreadySubscribed(user_id.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SubscriptionError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        SubscriptionError::Infrastructure(message.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SubscriptionError::AuthenticationFailure(_) => "AUTHENTICATION_FAILURE",
            SubscriptionError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SubscriptionError::DuplicateEvent => "DUPLICATE_EVENT",
            SubscriptionError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            SubscriptionError::ProviderRejected(_) => "PROVIDER_REJECTED",
            SubscriptionError::Unconfirmed(_) => "UNCONFIRMED",
            SubscriptionError::StaleWrite => "STALE_WRITE",
            SubscriptionError::SignatureInvalid => "SIGNATURE_INVALID",
            SubscriptionError::NotFound(_) => "NOT_FOUND",
            SubscriptionError::AlreadySubscribed(_) => "ALREADY_SUBSCRIBED",
            SubscriptionError::ValidationFailed { .. } => "VALIDATION_FAILED",
            SubscriptionError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }

    /// Detailed message for logs.
    pub fn message(&self) -> String {
        match self {
            SubscriptionError::AuthenticationFailure(msg) => {
                format!("Payment provider authentication failed: {}", msg)
            }
            SubscriptionError::InvalidTransition { current, attempted } => {
                format!("Cannot apply {} to subscription in {} state", attempted, current)
            }
            SubscriptionError::DuplicateEvent => "Event already applied".to_string(),
            SubscriptionError::ProviderUnavailable(msg) => {
                format!("Payment provider unavailable: {}", msg)
            }
            SubscriptionError::ProviderRejected(msg) => {
                format!("Payment provider rejected the request: {}", msg)
            }
            SubscriptionError::Unconfirmed(msg) => {
                format!("Payment provider outcome unknown: {}", msg)
            }
            SubscriptionError::StaleWrite => {
                "Subscription changed concurrently; re-read and retry".to_string()
            }
            SubscriptionError::SignatureInvalid => "Invalid webhook signature".to_string(),
            SubscriptionError::NotFound(what) => format!("Subscription not found: {}", what),
            SubscriptionError::AlreadySubscribed(user_id) => {
                format!("User {} already has a live subscription", user_id)
            }
            SubscriptionError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            SubscriptionError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// Collapses the error to one of the three subscriber-facing messages.
    pub fn user_message(&self) -> UserMessage {
        match self {
            SubscriptionError::Unconfirmed(_) => UserMessage::Unconfirmed,
            SubscriptionError::InvalidTransition { .. }
            | SubscriptionError::AlreadySubscribed(_)
            | SubscriptionError::NotFound(_) => UserMessage::NotValidForState,
            _ => UserMessage::TryAgain,
        }
    }

    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::ProviderUnavailable(_)
                | SubscriptionError::AuthenticationFailure(_)
                | SubscriptionError::StaleWrite
                | SubscriptionError::Infrastructure(_)
                | SubscriptionError::Unconfirmed(_)
        )
    }
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for SubscriptionError {}

impl From<Rejection> for SubscriptionError {
    fn from(rejection: Rejection) -> Self {
        SubscriptionError::invalid_transition(rejection.from.as_str(), rejection.event.as_str())
    }
}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::StaleWrite => SubscriptionError::StaleWrite,
            ErrorCode::DuplicateEvent => SubscriptionError::DuplicateEvent,
            ErrorCode::SubscriptionNotFound => SubscriptionError::NotFound(err.message),
            ErrorCode::SubscriptionExists => SubscriptionError::AlreadySubscribed(
                err.details.get("user_id").cloned().unwrap_or_default(),
            ),
            ErrorCode::InvalidStateTransition | ErrorCode::ProviderIdImmutable => {
                SubscriptionError::InvalidTransition {
                    current: err.details.get("current").cloned().unwrap_or_default(),
                    attempted: err.message,
                }
            }
            ErrorCode::ValidationFailed => SubscriptionError::ValidationFailed {
                field: err.details.get("field").cloned().unwrap_or_default(),
                message: err.message,
            },
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                SubscriptionError::Infrastructure(err.message)
            }
        }
    }
}
