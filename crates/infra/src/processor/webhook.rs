//! Webhook wire format.
//!
//! ```json
//! { "id": "evt_...", "type": "payment_intent.succeeded", "created": 1700000000,
//!   "data": { "object": { "id": "pi_...", "metadata": { "split_id": "..." },
//!                         "latest_charge": "ch_...", "processing_fee": 117 } } }
//! ```
//!
//! Metadata travels as a flat string map, as processors store it. The same
//! intent object is returned by the processor's REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tripvault_core::IntentId;
use tripvault_vault::{ChargeDetails, IntentMetadata, WebhookEvent};

use super::ProcessorError;

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub created: i64,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: JsonValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentObject {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_payment_error: Option<PaymentErrorObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_charge: Option<String>,
    /// Minor units kept by the processor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_fee: Option<i64>,
}

impl IntentObject {
    pub fn charge(&self) -> Result<ChargeDetails, ProcessorError> {
        if let Some(fee) = self.processing_fee.filter(|fee| *fee < 0) {
            return Err(ProcessorError::MalformedPayload(format!(
                "intent {} reports a negative fee ({fee})",
                self.id
            )));
        }
        Ok(ChargeDetails {
            charge_id: self.latest_charge.clone(),
            fee_minor: self.processing_fee,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentErrorObject {
    #[serde(default)]
    pub message: Option<String>,
}

pub fn metadata_to_map(metadata: &IntentMetadata) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("split_id".to_string(), metadata.split_id.to_string()),
        ("trip_id".to_string(), metadata.trip_id.to_string()),
        ("payer_id".to_string(), metadata.payer_id.to_string()),
        ("recipient_id".to_string(), metadata.recipient_id.to_string()),
    ])
}

/// `None` if any key is missing or unparsable.
pub fn metadata_from_map(map: &BTreeMap<String, String>) -> Option<IntentMetadata> {
    Some(IntentMetadata {
        split_id: map.get("split_id")?.parse().ok()?,
        trip_id: map.get("trip_id")?.parse().ok()?,
        payer_id: map.get("payer_id")?.parse().ok()?,
        recipient_id: map.get("recipient_id")?.parse().ok()?,
    })
}

/// Parse a verified webhook body into a domain event.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, ProcessorError> {
    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| ProcessorError::MalformedPayload(e.to_string()))?;

    let intent = || -> Result<IntentObject, ProcessorError> {
        serde_json::from_value(payload.data.object.clone())
            .map_err(|e| ProcessorError::MalformedPayload(format!("{} object: {e}", payload.kind)))
    };

    let event = match payload.kind.as_str() {
        PAYMENT_SUCCEEDED => {
            let object = intent()?;
            WebhookEvent::Succeeded {
                metadata: metadata_from_map(&object.metadata),
                charge: object.charge()?,
                intent_id: IntentId::new(object.id),
            }
        }
        PAYMENT_FAILED => {
            let object = intent()?;
            WebhookEvent::Failed {
                message: object.last_payment_error.and_then(|e| e.message),
                intent_id: IntentId::new(object.id),
            }
        }
        PAYMENT_CANCELED => WebhookEvent::Canceled {
            intent_id: IntentId::new(intent()?.id),
        },
        other => WebhookEvent::Other {
            kind: other.to_string(),
        },
    };
    Ok(event)
}

/// Serialise an event the way the processor would deliver it.
pub fn encode_event(event_id: &str, kind: &str, created: i64, object: &IntentObject) -> Result<Vec<u8>, ProcessorError> {
    let object = serde_json::to_value(object).map_err(|e| ProcessorError::MalformedPayload(e.to_string()))?;
    serde_json::to_vec(&WebhookPayload {
        id: event_id.to_string(),
        kind: kind.to_string(),
        created,
        data: WebhookData { object },
    })
    .map_err(|e| ProcessorError::MalformedPayload(e.to_string()))
}
