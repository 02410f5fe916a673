//! In-process payment processor for development and tests.
//!
//! Intents live in memory. Outcomes are driven explicitly with
//! [`SimulatedProcessor::succeed`], [`SimulatedProcessor::fail`] and
//! [`SimulatedProcessor::cancel`], each of which returns the signed webhook a
//! real processor would deliver.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

use tripvault_core::{IntentId, Money};
use tripvault_vault::{ChargeDetails, IntentMetadata, IntentStatus, WebhookEvent};

use super::signature::{WebhookSigner, verify_signature};
use super::webhook::{
    IntentObject, PAYMENT_CANCELED, PAYMENT_FAILED, PAYMENT_SUCCEEDED, PaymentErrorObject,
    encode_event, metadata_to_map, parse_event,
};
use super::{CreatedIntent, PaymentProcessor, ProcessorError, ProcessorIntent};

/// A webhook body together with its signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWebhook {
    pub body: Vec<u8>,
    pub signature: String,
}

#[derive(Debug, Clone)]
struct SimIntent {
    amount: Money,
    metadata: IntentMetadata,
    status: IntentStatus,
    failure_message: Option<String>,
    charge: ChargeDetails,
}

/// Card-style pricing: 2.9% plus 30 minor units, never more than the amount.
pub fn simulated_fee(amount_minor: i64) -> i64 {
    (amount_minor.saturating_mul(29) / 1000).saturating_add(30).min(amount_minor)
}

#[derive(Debug)]
pub struct SimulatedProcessor {
    secret: Vec<u8>,
    signer: WebhookSigner,
    tolerance_secs: i64,
    intents: RwLock<HashMap<IntentId, SimIntent>>,
    unavailable: AtomicBool,
}

impl SimulatedProcessor {
    pub fn new(webhook_secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        let secret = webhook_secret.into();
        Self {
            signer: WebhookSigner::new(secret.clone()),
            secret,
            tolerance_secs,
            intents: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every API call fails with a retryable error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn succeed(&self, id: &IntentId) -> Result<SignedWebhook, ProcessorError> {
        self.transition(id, IntentStatus::Succeeded, None)
    }

    pub fn fail(&self, id: &IntentId, message: &str) -> Result<SignedWebhook, ProcessorError> {
        self.transition(id, IntentStatus::Failed, Some(message.to_string()))
    }

    pub fn cancel(&self, id: &IntentId) -> Result<SignedWebhook, ProcessorError> {
        self.transition(id, IntentStatus::Canceled, None)
    }

    /// Sign an arbitrary body with the webhook secret at the current time.
    pub fn sign(&self, body: Vec<u8>) -> Result<SignedWebhook, ProcessorError> {
        let signature = self.signer.sign(&body, Utc::now().timestamp())?;
        Ok(SignedWebhook { body, signature })
    }

    fn transition(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
    ) -> Result<SignedWebhook, ProcessorError> {
        let object = {
            let mut intents = self
                .intents
                .write()
                .map_err(|_| ProcessorError::Unavailable("lock poisoned".to_string()))?;
            let intent = intents
                .get_mut(id)
                .ok_or_else(|| ProcessorError::UnknownIntent(id.clone()))?;
            if intent.status.is_terminal() && intent.status != status {
                return Err(ProcessorError::Rejected(format!(
                    "intent {id} is already {}",
                    intent.status.as_str()
                )));
            }
            intent.status = status;
            intent.failure_message = failure_message.clone();
            if status == IntentStatus::Succeeded && intent.charge.charge_id.is_none() {
                intent.charge = ChargeDetails {
                    charge_id: Some(format!("ch_sim_{}", Uuid::now_v7().simple())),
                    fee_minor: Some(simulated_fee(intent.amount.amount_minor)),
                };
            }

            IntentObject {
                id: id.as_str().to_string(),
                status: Some(status.as_str().to_string()),
                metadata: metadata_to_map(&intent.metadata),
                last_payment_error: failure_message.map(|m| PaymentErrorObject { message: Some(m) }),
                latest_charge: intent.charge.charge_id.clone(),
                processing_fee: intent.charge.fee_minor,
                ..IntentObject::default()
            }
        };

        let kind = match status {
            IntentStatus::Succeeded => PAYMENT_SUCCEEDED,
            IntentStatus::Failed => PAYMENT_FAILED,
            _ => PAYMENT_CANCELED,
        };
        let event_id = format!("evt_sim_{}", Uuid::now_v7().simple());
        let body = encode_event(&event_id, kind, Utc::now().timestamp(), &object)?;
        self.sign(body)
    }

    fn ensure_available(&self) -> Result<(), ProcessorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn create_intent(&self, amount: &Money, metadata: &IntentMetadata) -> Result<CreatedIntent, ProcessorError> {
        self.ensure_available()?;
        if !amount.is_positive() {
            return Err(ProcessorError::Rejected("amount must be positive".to_string()));
        }

        let id = IntentId::new(format!("pi_sim_{}", Uuid::now_v7().simple()));
        let client_secret = format!("{id}_secret_{}", Uuid::now_v7().simple());
        self.intents
            .write()
            .map_err(|_| ProcessorError::Unavailable("lock poisoned".to_string()))?
            .insert(
                id.clone(),
                SimIntent {
                    amount: amount.clone(),
                    metadata: metadata.clone(),
                    status: IntentStatus::Pending,
                    failure_message: None,
                    charge: ChargeDetails::default(),
                },
            );

        tracing::debug!(intent_id = %id, amount = %amount, "simulated intent created");
        Ok(CreatedIntent { id, client_secret })
    }

    async fn retrieve_intent(&self, id: &IntentId) -> Result<ProcessorIntent, ProcessorError> {
        self.ensure_available()?;
        let intents = self
            .intents
            .read()
            .map_err(|_| ProcessorError::Unavailable("lock poisoned".to_string()))?;
        let intent = intents
            .get(id)
            .ok_or_else(|| ProcessorError::UnknownIntent(id.clone()))?;
        Ok(ProcessorIntent {
            id: id.clone(),
            status: intent.status,
            failure_message: intent.failure_message.clone(),
            charge: intent.charge.clone(),
        })
    }

    fn verify_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent, ProcessorError> {
        verify_signature(
            &self.secret,
            raw_body,
            signature_header,
            Utc::now().timestamp(),
            self.tolerance_secs,
        )?;
        parse_event(raw_body)
    }
}
