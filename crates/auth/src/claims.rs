use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tripvault_core::UserId;

/// JWT claims model (transport-agnostic).
///
/// Identity is owned by the wider platform; the vault only needs to know who
/// is calling and for how long the token is good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Authenticated user.
    pub sub: UserId,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

/// Tolerated drift between the token issuer's clock and ours.
pub const ISSUED_AT_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("bearer token expired")]
    Expired,

    #[error("bearer token issued in the future")]
    NotYetValid,

    #[error("bearer token expires before it was issued")]
    InvalidTimeWindow,

    #[error("malformed or unsigned token: {0}")]
    Malformed(String),
}

/// Check the claim time window against `now`. Signature checks live in
/// [`crate::jwt`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now + Duration::seconds(ISSUED_AT_LEEWAY_SECS) < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
