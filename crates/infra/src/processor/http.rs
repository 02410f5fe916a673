//! REST client for a hosted payment processor.
//!
//! Speaks the form-encoded intents API, authenticated with the secret key as a
//! bearer token:
//!
//! ```text
//! POST {base}/v1/payment_intents        amount, currency, metadata[..]
//! GET  {base}/v1/payment_intents/{id}
//! ```
//!
//! Network failures, 429 and 5xx map to [`ProcessorError::Unavailable`]; any
//! other non-success status is a [`ProcessorError::Rejected`].

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use tripvault_core::{IntentId, Money};
use tripvault_vault::{IntentMetadata, IntentStatus, WebhookEvent};

use super::signature::verify_signature;
use super::webhook::{IntentObject, metadata_to_map, parse_event};
use super::{CreatedIntent, PaymentProcessor, ProcessorError, ProcessorIntent};
use crate::config::VaultConfig;

const INTENTS_PATH: &str = "/v1/payment_intents";

pub struct HttpProcessor {
    client: Client,
    api_base: String,
    secret_key: String,
    webhook_secret: Vec<u8>,
    tolerance_secs: i64,
}

impl HttpProcessor {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        webhook_secret: impl Into<Vec<u8>>,
        tolerance_secs: i64,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ProcessorError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            tolerance_secs,
        })
    }

    /// `None` when no processor endpoint is configured.
    pub fn from_config(config: &VaultConfig) -> Result<Option<Self>, ProcessorError> {
        let (Some(base), Some(key)) = (&config.processor_api_base, &config.processor_secret_key) else {
            return Ok(None);
        };
        Self::new(
            base.clone(),
            key.clone(),
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
            Duration::from_secs(config.processor_timeout_secs),
        )
        .map(Some)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// `intent` names the intent a 404 refers to, if any.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        intent: Option<&IntentId>,
    ) -> Result<IntentObject, ProcessorError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Unavailable(format!("reading response: {e}")))?;

        if let (StatusCode::NOT_FOUND, Some(id)) = (status, intent) {
            return Err(ProcessorError::UnknownIntent(id.clone()));
        }
        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }
        serde_json::from_str(&body)
            .map_err(|e| ProcessorError::Unavailable(format!("unreadable processor response: {e}")))
    }
}

impl std::fmt::Debug for HttpProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProcessor")
            .field("api_base", &self.api_base)
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "cannot connect to processor".to_string()
    } else {
        err.to_string()
    }
}

/// `None` for a success status.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> Option<ProcessorError> {
    if status.is_success() {
        return None;
    }
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(ProcessorError::Unavailable(message))
    } else {
        Some(ProcessorError::Rejected(message))
    }
}

/// Collapse the processor's intent lifecycle onto ours.
pub(crate) fn intent_status(object: &IntentObject) -> IntentStatus {
    match object.status.as_deref() {
        Some("succeeded") => IntentStatus::Succeeded,
        Some("canceled") => IntentStatus::Canceled,
        Some("failed") => IntentStatus::Failed,
        // A declined attempt sends the intent back for a new payment method.
        Some("requires_payment_method") if object.last_payment_error.is_some() => IntentStatus::Failed,
        _ => IntentStatus::Pending,
    }
}

pub(crate) fn intent_form(amount: &Money, metadata: &IntentMetadata) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), amount.amount_minor.to_string()),
        ("currency".to_string(), amount.currency.as_str().to_ascii_lowercase()),
        ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        (
            "description".to_string(),
            format!("Trip vault payment for split {}", metadata.split_id),
        ),
    ];
    form.extend(
        metadata_to_map(metadata)
            .into_iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value)),
    );
    form
}

#[async_trait::async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn create_intent(&self, amount: &Money, metadata: &IntentMetadata) -> Result<CreatedIntent, ProcessorError> {
        if !amount.is_positive() {
            return Err(ProcessorError::Rejected("amount must be positive".to_string()));
        }

        let url = format!("{}{INTENTS_PATH}", self.api_base);
        let object = self
            .send(self.client.post(url).form(&intent_form(amount, metadata)), None)
            .await?;
        let client_secret = object.client_secret.clone().ok_or_else(|| {
            ProcessorError::Rejected(format!("intent {} was returned without a client secret", object.id))
        })?;

        tracing::debug!(intent_id = %object.id, amount = %amount, "processor intent created");
        Ok(CreatedIntent {
            id: IntentId::new(object.id),
            client_secret,
        })
    }

    async fn retrieve_intent(&self, id: &IntentId) -> Result<ProcessorIntent, ProcessorError> {
        let url = format!("{}{INTENTS_PATH}/{}", self.api_base, id.as_str());
        let object = self.send(self.client.get(url), Some(id)).await?;

        Ok(ProcessorIntent {
            id: id.clone(),
            status: intent_status(&object),
            failure_message: object.last_payment_error.as_ref().and_then(|e| e.message.clone()),
            charge: object.charge()?,
        })
    }

    fn verify_webhook(&self, raw_body: &[u8], signature_header: &str) -> Result<WebhookEvent, ProcessorError> {
        verify_signature(
            &self.webhook_secret,
            raw_body,
            signature_header,
            Utc::now().timestamp(),
            self.tolerance_secs,
        )?;
        parse_event(raw_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::WebhookSigner;
    use crate::processor::webhook::PaymentErrorObject;
    use tripvault_core::{Currency, SplitId, TripId, UserId};

    fn object(status: &str) -> IntentObject {
        IntentObject {
            id: "pi_1".to_string(),
            status: Some(status.to_string()),
            ..IntentObject::default()
        }
    }

    #[test]
    fn status_codes_split_into_retryable_and_rejected() {
        assert!(classify_status(StatusCode::OK, "").is_none());
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "<html>"),
            Some(ProcessorError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            Some(ProcessorError::Unavailable(_))
        ));
        assert_eq!(
            classify_status(
                StatusCode::PAYMENT_REQUIRED,
                r#"{"error":{"type":"card_error","message":"Your card was declined."}}"#
            ),
            Some(ProcessorError::Rejected("Your card was declined.".to_string()))
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "missing"),
            Some(ProcessorError::Rejected(StatusCode::NOT_FOUND.to_string()))
        );
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"Invalid API Key"}}"#),
            Some(ProcessorError::Rejected(m)) if m == "Invalid API Key"
        ));
    }

    #[test]
    fn processor_lifecycle_maps_onto_intent_status() {
        assert_eq!(intent_status(&object("succeeded")), IntentStatus::Succeeded);
        assert_eq!(intent_status(&object("canceled")), IntentStatus::Canceled);
        assert_eq!(intent_status(&object("processing")), IntentStatus::Pending);
        assert_eq!(intent_status(&object("requires_payment_method")), IntentStatus::Pending);

        let mut declined = object("requires_payment_method");
        declined.last_payment_error = Some(PaymentErrorObject {
            message: Some("card declined".to_string()),
        });
        assert_eq!(intent_status(&declined), IntentStatus::Failed);
    }

    #[test]
    fn intent_form_carries_minor_units_and_metadata() {
        let metadata = IntentMetadata {
            split_id: SplitId::new(),
            trip_id: TripId::new(),
            payer_id: UserId::new(),
            recipient_id: UserId::new(),
        };
        let form = intent_form(&Money::new(2550, Currency::new("EUR").unwrap()), &metadata);
        let value = |key: &str| form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        assert_eq!(value("amount"), Some("2550"));
        assert_eq!(value("currency"), Some("eur"));
        assert_eq!(value("metadata[split_id]"), Some(metadata.split_id.to_string().as_str()));
        assert_eq!(value("metadata[payer_id]"), Some(metadata.payer_id.to_string().as_str()));
    }

    #[test]
    fn webhooks_are_verified_with_the_configured_secret() {
        let processor =
            HttpProcessor::new("https://api.processor.test/", "sk_test", "whsec_live", 300, Duration::from_secs(5))
                .unwrap();
        assert_eq!(processor.api_base(), "https://api.processor.test");
        assert!(!format!("{processor:?}").contains("sk_test"));

        let body = br#"{"id":"evt_1","type":"payment_intent.canceled","data":{"object":{"id":"pi_1"}}}"#;
        let now = Utc::now().timestamp();
        let good = WebhookSigner::new(b"whsec_live".to_vec()).sign(body, now).unwrap();
        assert_eq!(
            processor.verify_webhook(body, &good).unwrap(),
            WebhookEvent::Canceled {
                intent_id: IntentId::new("pi_1")
            }
        );

        let forged = WebhookSigner::new(b"whsec_other".to_vec()).sign(body, now).unwrap();
        assert!(matches!(
            processor.verify_webhook(body, &forged),
            Err(ProcessorError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_processor_is_retryable() {
        // Port 9 (discard) on loopback refuses connections.
        let processor =
            HttpProcessor::new("http://127.0.0.1:9", "sk_test", "whsec", 300, Duration::from_secs(2)).unwrap();
        let err = processor.retrieve_intent(&IntentId::new("pi_1")).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Unavailable(_)));
    }
}
