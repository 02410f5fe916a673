//! Vault application service.
//!
//! `VaultService` composes the ledger store, the trip directory and the
//! payment processor. Every public operation resolves a
//! [`VaultPolicyContext`], runs the pure authority rules from
//! `tripvault-auth`, and only then touches the store.
//!
//! The service holds no locks of its own; atomicity lives in the repository
//! (single-call units and compare-and-set), so concurrent requests for
//! different splits never contend here.

mod authority;
mod ledger;
mod settlement;

pub use ledger::CreateEntryRequest;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use tripvault_auth::{VaultAction, VaultPolicyContext, authorize};
use tripvault_core::{Currency, TripId, UserId, VaultError, VaultResult};

use crate::directory::TripDirectory;
use crate::processor::PaymentProcessor;
use crate::repository::VaultRepository;

/// Tunables the service needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    /// How long a pending payment intent blocks a new one for the same split.
    pub intent_ttl: Duration,
    /// Currency used when an entry does not name one.
    pub default_currency: Currency,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            intent_ttl: Duration::minutes(30),
            default_currency: Currency::usd(),
        }
    }
}

impl From<&crate::config::VaultConfig> for VaultSettings {
    fn from(config: &crate::config::VaultConfig) -> Self {
        Self {
            intent_ttl: config.intent_ttl(),
            default_currency: config.default_currency.clone(),
        }
    }
}

#[derive(Clone)]
pub struct VaultService {
    repo: Arc<dyn VaultRepository>,
    directory: Arc<dyn TripDirectory>,
    processor: Arc<dyn PaymentProcessor>,
    settings: VaultSettings,
}

impl VaultService {
    pub fn new(
        repo: Arc<dyn VaultRepository>,
        directory: Arc<dyn TripDirectory>,
        processor: Arc<dyn PaymentProcessor>,
        settings: VaultSettings,
    ) -> Self {
        Self {
            repo,
            directory,
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    /// Resolve leader and participants for `trip_id`.
    ///
    /// Also returns the explicitly stored leader (if any), which is the
    /// expected value for a leadership compare-and-set.
    async fn load_policy(&self, trip_id: TripId) -> VaultResult<(VaultPolicyContext, Option<UserId>)> {
        let creator = self
            .directory
            .creator(trip_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("trip {trip_id}")))?;
        let stored = self.repo.vault_leader(trip_id).await?;
        let participants = self.directory.participants(trip_id).await?;

        let leader = stored.unwrap_or(creator);
        Ok((VaultPolicyContext::new(trip_id, leader, participants), stored))
    }

    async fn policy_context(&self, trip_id: TripId) -> VaultResult<VaultPolicyContext> {
        Ok(self.load_policy(trip_id).await?.0)
    }

    /// Load the context and check `action` in one step.
    async fn authorize(&self, trip_id: TripId, actor: UserId, action: VaultAction) -> VaultResult<VaultPolicyContext> {
        let ctx = self.policy_context(trip_id).await?;
        authorize(&ctx, actor, &action)?;
        Ok(ctx)
    }
}

impl std::fmt::Debug for VaultService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
