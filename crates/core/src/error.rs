//! Vault error model.

use thiserror::Error;

use crate::id::{IntentId, SplitId, TripId, UserId};

/// Result type used across the vault.
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault-level error.
///
/// Validation and authorization failures are deterministic and surfaced to the
/// caller as-is. `ExternalProcessor`, `Conflict` and `Storage` are transient and
/// may be retried by the caller (or by the processor, for webhooks).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Malformed input (bad amount, empty description, bad identifiers...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Split inputs do not reconcile with the entry amount.
    #[error("split does not reconcile: {0}")]
    SplitMismatch(String),

    /// A split strategy was given zero participants.
    #[error("split requires at least one participant")]
    EmptyParticipantSet,

    /// The acting user may not perform this operation.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The user is not a participant of the trip.
    #[error("user {user_id} is not a participant of trip {trip_id}")]
    NotParticipant { user_id: UserId, trip_id: TripId },

    /// A referenced entry, split, intent or trip does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Attempt to pay a split that is already paid.
    #[error("split {0} is already settled")]
    AlreadySettled(SplitId),

    /// A payment for this split is already in flight.
    #[error("payment {intent_id} for split {split_id} is still pending")]
    SettlementInProgress { split_id: SplitId, intent_id: IntentId },

    /// A compare-and-set lost against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The payment processor failed (network, 4xx, 5xx).
    #[error("payment processor error: {message}")]
    ExternalProcessor { message: String, retryable: bool },

    /// A webhook failed signature verification or could not be parsed.
    #[error("webhook verification failed: {0}")]
    WebhookVerification(String),

    /// The ledger store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl VaultError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn split_mismatch(msg: impl Into<String>) -> Self {
        Self::SplitMismatch(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::ExternalProcessor { retryable, .. } => *retryable,
            VaultError::Conflict(_) | VaultError::Storage(_) => true,
            _ => false,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "validation_error",
            VaultError::SplitMismatch(_) => "split_mismatch",
            VaultError::EmptyParticipantSet => "empty_participant_set",
            VaultError::Authorization(_) => "authorization_error",
            VaultError::NotParticipant { .. } => "not_participant",
            VaultError::NotFound(_) => "not_found",
            VaultError::AlreadySettled(_) => "already_settled",
            VaultError::SettlementInProgress { .. } => "settlement_in_progress",
            VaultError::Conflict(_) => "conflict",
            VaultError::ExternalProcessor { .. } => "external_processor_error",
            VaultError::WebhookVerification(_) => "webhook_verification_error",
            VaultError::Storage(_) => "storage_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(VaultError::storage("db down").is_retryable());
        assert!(VaultError::conflict("leader changed").is_retryable());
        assert!(
            VaultError::ExternalProcessor {
                message: "timeout".into(),
                retryable: true
            }
            .is_retryable()
        );
        assert!(
            !VaultError::ExternalProcessor {
                message: "card declined".into(),
                retryable: false
            }
            .is_retryable()
        );
        assert!(!VaultError::validation("bad").is_retryable());
        assert!(!VaultError::AlreadySettled(SplitId::new()).is_retryable());
    }
}
