//! Webhook ingress domain: PayPal payload vocabulary, transmission
//! headers, signature checks and the error-to-status mapping.

mod errors;
mod paypal_event;
mod transmission;

pub use errors::WebhookError;
pub use paypal_event::{
    BillingInfo, LastPayment, PayPalEventType, PayPalWebhookEvent, ProviderNotice,
    SubscriptionResource,
};
pub use transmission::{
    sign_transmission, SharedSecretVerifier, TransmissionHeaders, HEADER_AUTH_ALGO,
    HEADER_CERT_URL, HEADER_TRANSMISSION_ID, HEADER_TRANSMISSION_SIG, HEADER_TRANSMISSION_TIME,
};
