use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Decodes and verifies a bearer token into [`JwtClaims`].
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 signed tokens with a shared secret.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry lives in `expires_at` and is checked by `validate_claims`.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(&secret),
            validation,
        }
    }
}

impl std::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hs256JwtValidator").finish_non_exhaustive()
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tripvault_core::UserId;

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: UserId::new(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_same_secret() {
        let now = Utc::now();
        let claims = claims(now);
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        assert_eq!(validator.validate(&mint("s3cret", &claims), now).unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        assert!(matches!(
            validator.validate(&mint("other", &claims(now)), now),
            Err(TokenValidationError::Malformed(_))
        ));
        assert!(validator.validate("not.a.jwt", now).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"s3cret".to_vec());
        let token = mint("s3cret", &claims(now - Duration::hours(1)));
        assert_eq!(validator.validate(&token, now), Err(TokenValidationError::Expired));
    }
}
