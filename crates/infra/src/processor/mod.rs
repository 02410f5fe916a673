//! Payment processor boundary.
//!
//! The vault never moves money itself: it asks a processor for a payment
//! intent, hands the client secret to the payer, and learns the outcome from
//! signed webhooks (or by retrieving the intent on confirmation).

pub mod http;
pub mod signature;
pub mod simulated;
pub mod webhook;

pub use http::HttpProcessor;
pub use signature::{WebhookSigner, verify_signature};
pub use simulated::{SignedWebhook, SimulatedProcessor};

use std::sync::Arc;

use thiserror::Error;

use tripvault_core::{IntentId, Money, VaultError};
use tripvault_vault::{ChargeDetails, IntentMetadata, IntentStatus, WebhookEvent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Network failure, timeout or 5xx; safe to retry.
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    /// The processor refused the request (4xx).
    #[error("processor rejected request: {0}")]
    Rejected(String),

    #[error("processor has no intent {0}")]
    UnknownIntent(IntentId),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

impl From<ProcessorError> for VaultError {
    fn from(value: ProcessorError) -> Self {
        match value {
            ProcessorError::Unavailable(message) => VaultError::ExternalProcessor {
                message,
                retryable: true,
            },
            ProcessorError::Rejected(message) => VaultError::ExternalProcessor {
                message,
                retryable: false,
            },
            ProcessorError::UnknownIntent(id) => VaultError::NotFound(format!("payment intent {id}")),
            ProcessorError::InvalidSignature(msg) | ProcessorError::MalformedPayload(msg) => {
                VaultError::WebhookVerification(msg)
            }
        }
    }
}

/// Intent as created by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub id: IntentId,
    pub client_secret: String,
}

/// Intent state as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorIntent {
    pub id: IntentId,
    pub status: IntentStatus,
    pub failure_message: Option<String>,
    /// Populated once the intent has succeeded.
    pub charge: ChargeDetails,
}

#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(&self, amount: &Money, metadata: &IntentMetadata) -> Result<CreatedIntent, ProcessorError>;

    async fn retrieve_intent(&self, id: &IntentId) -> Result<ProcessorIntent, ProcessorError>;

    /// Authenticate a raw webhook delivery and parse it.
    fn verify_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent, ProcessorError>;
}

#[async_trait::async_trait]
impl<S> PaymentProcessor for Arc<S>
where
    S: PaymentProcessor + ?Sized,
{
    async fn create_intent(&self, amount: &Money, metadata: &IntentMetadata) -> Result<CreatedIntent, ProcessorError> {
        (**self).create_intent(amount, metadata).await
    }

    async fn retrieve_intent(&self, id: &IntentId) -> Result<ProcessorIntent, ProcessorError> {
        (**self).retrieve_intent(id).await
    }

    fn verify_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent, ProcessorError> {
        (**self).verify_webhook(raw_body, signature_header)
    }
}
