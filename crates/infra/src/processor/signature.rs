//! HMAC-SHA256 webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>` where the MAC covers
//! `"<t>.<raw body>"`. Several `v1` values may be present during secret
//! rotation; any match is accepted.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ProcessorError;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &[u8], timestamp: i64, body: &[u8]) -> Result<HmacSha256, ProcessorError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| ProcessorError::InvalidSignature("unusable webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Verify `header` against `body` at time `now` (unix seconds).
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), ProcessorError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => {
                timestamp = Some(v.parse::<i64>().map_err(|_| {
                    ProcessorError::InvalidSignature("timestamp is not an integer".to_string())
                })?);
            }
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| ProcessorError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(ProcessorError::InvalidSignature("missing v1 signature".to_string()));
    }
    // `t` is attacker-controlled; compare without signed subtraction.
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(ProcessorError::InvalidSignature(format!(
            "timestamp {timestamp} outside tolerance of {tolerance_secs}s"
        )));
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time.
        if mac_for(secret, timestamp, body)?.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(ProcessorError::InvalidSignature("no matching signature".to_string()))
}

/// Produces signature headers; used by the simulated processor and tests.
#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl WebhookSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, body: &[u8], timestamp: i64) -> Result<String, ProcessorError> {
        let mac = mac_for(&self.secret, timestamp, body)?;
        Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
    }
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}
