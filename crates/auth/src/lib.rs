//! `tripvault-auth` — pure authentication/authorization boundary for the vault.
//!
//! This crate is intentionally decoupled from HTTP and storage: callers gather
//! a [`VaultPolicyContext`] and ask [`authorize`] for a decision.

pub mod authority;
pub mod claims;
pub mod jwt;

pub use authority::{AuthzError, VaultAction, VaultPolicyContext, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
