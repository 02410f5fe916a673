//! Expense ledger store: entries, splits, payment intents, settlements and
//! vault leadership.
//!
//! Every mutation that must be atomic is a single trait call, so
//! implementations can map it onto one lock acquisition (in-memory) or one
//! transaction (Postgres).

#[cfg(any(test, feature = "test-utils"))]
mod faulty;
mod in_memory;
mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub use faulty::FaultyVaultRepository;
pub use in_memory::InMemoryVaultRepository;
pub use postgres::PostgresVaultRepository;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tripvault_core::{EntryId, IntentId, SplitId, TripId, UserId, VaultError};
use tripvault_vault::{
    CasOutcome, IntentStatus, PaymentIntentRecord, SettlementRecord, UnpaidSplit, VaultEntry,
    VaultSplit,
};

/// Store operation error.
///
/// These are infrastructure errors as opposed to domain errors; the service
/// layer converts them into [`VaultError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness or compare-and-set constraint was hit.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<RepositoryError> for VaultError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(what) => VaultError::NotFound(what),
            RepositoryError::Conflict(msg) => VaultError::Conflict(msg),
            RepositoryError::Storage(msg) => VaultError::Storage(msg),
        }
    }
}

/// Result of a guarded entry deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
    /// A split is already paid; nothing was removed.
    HasPaidSplits,
    /// A split has a live pending intent; nothing was removed.
    PaymentInFlight { split_id: SplitId, intent_id: IntentId },
}

#[async_trait::async_trait]
pub trait VaultRepository: Send + Sync {
    /// Insert an entry and all of its splits as one unit.
    async fn create_entry_with_splits(&self, entry: VaultEntry) -> Result<VaultEntry, RepositoryError>;

    async fn get_entry(&self, id: EntryId) -> Result<Option<VaultEntry>, RepositoryError>;

    /// Entries of a trip, newest `occurred_at` first (ties broken by id).
    async fn list_entries(&self, trip_id: TripId) -> Result<Vec<VaultEntry>, RepositoryError>;

    /// Remove an entry and everything hanging off its splits, unless a split
    /// is paid or has a pending intent created after `live_after`.
    ///
    /// The guard and the removal are one atomic step, so a settlement racing
    /// the delete either lands first (and blocks it) or finds the split gone.
    async fn delete_entry(&self, id: EntryId, live_after: DateTime<Utc>) -> Result<DeleteOutcome, RepositoryError>;

    /// Split joined with its entry.
    async fn get_split(&self, split_id: SplitId) -> Result<Option<(VaultEntry, VaultSplit)>, RepositoryError>;

    /// Compare-and-set `paid: false -> true` for `record.split_id`.
    ///
    /// On `Applied` the split's paid fields, the settlement record and (for
    /// processor settlements) the intent's `Succeeded` status are written
    /// together. On `AlreadyPaid` only a still-pending processor intent is
    /// closed as `Succeeded`.
    async fn set_split_paid_if_unpaid(&self, record: &SettlementRecord) -> Result<CasOutcome, RepositoryError>;

    /// Unpaid, processor-payable splits owed by `user` to someone else,
    /// newest entry first.
    ///
    /// `trip_id = None` spans every trip.
    async fn list_unpaid_splits_for_user(
        &self,
        user: UserId,
        trip_id: Option<TripId>,
    ) -> Result<Vec<UnpaidSplit>, RepositoryError>;

    /// Persist a correlation record unless another intent was recorded for the
    /// split since `observed_latest` was read.
    ///
    /// Returns `false` (and writes nothing) when the split is already paid or
    /// the latest intent is no longer `observed_latest`.
    async fn insert_intent(
        &self,
        intent: &PaymentIntentRecord,
        observed_latest: Option<&IntentId>,
    ) -> Result<bool, RepositoryError>;

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntentRecord>, RepositoryError>;

    async fn latest_intent_for_split(
        &self,
        split_id: SplitId,
    ) -> Result<Option<PaymentIntentRecord>, RepositoryError>;

    /// Compare-and-set an intent out of `Pending`.
    ///
    /// Returns `false` if the intent had already left `Pending`.
    async fn update_intent_status(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Settlement history of a trip, newest first.
    async fn list_settlements(&self, trip_id: TripId) -> Result<Vec<SettlementRecord>, RepositoryError>;

    /// Explicitly assigned leader; `None` if leadership was never transferred.
    async fn vault_leader(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError>;

    /// Compare-and-set the stored leader from `expected` to `new_leader`.
    async fn replace_vault_leader(
        &self,
        trip_id: TripId,
        expected: Option<UserId>,
        new_leader: UserId,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait::async_trait]
impl<S> VaultRepository for Arc<S>
where
    S: VaultRepository + ?Sized,
{
    async fn create_entry_with_splits(&self, entry: VaultEntry) -> Result<VaultEntry, RepositoryError> {
        (**self).create_entry_with_splits(entry).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<VaultEntry>, RepositoryError> {
        (**self).get_entry(id).await
    }

    async fn list_entries(&self, trip_id: TripId) -> Result<Vec<VaultEntry>, RepositoryError> {
        (**self).list_entries(trip_id).await
    }

    async fn delete_entry(&self, id: EntryId, live_after: DateTime<Utc>) -> Result<DeleteOutcome, RepositoryError> {
        (**self).delete_entry(id, live_after).await
    }

    async fn get_split(&self, split_id: SplitId) -> Result<Option<(VaultEntry, VaultSplit)>, RepositoryError> {
        (**self).get_split(split_id).await
    }

    async fn set_split_paid_if_unpaid(&self, record: &SettlementRecord) -> Result<CasOutcome, RepositoryError> {
        (**self).set_split_paid_if_unpaid(record).await
    }

    async fn list_unpaid_splits_for_user(
        &self,
        user: UserId,
        trip_id: Option<TripId>,
    ) -> Result<Vec<UnpaidSplit>, RepositoryError> {
        (**self).list_unpaid_splits_for_user(user, trip_id).await
    }

    async fn insert_intent(
        &self,
        intent: &PaymentIntentRecord,
        observed_latest: Option<&IntentId>,
    ) -> Result<bool, RepositoryError> {
        (**self).insert_intent(intent, observed_latest).await
    }

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        (**self).get_intent(id).await
    }

    async fn latest_intent_for_split(
        &self,
        split_id: SplitId,
    ) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        (**self).latest_intent_for_split(split_id).await
    }

    async fn update_intent_status(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        (**self).update_intent_status(id, status, failure_message, at).await
    }

    async fn list_settlements(&self, trip_id: TripId) -> Result<Vec<SettlementRecord>, RepositoryError> {
        (**self).list_settlements(trip_id).await
    }

    async fn vault_leader(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        (**self).vault_leader(trip_id).await
    }

    async fn replace_vault_leader(
        &self,
        trip_id: TripId,
        expected: Option<UserId>,
        new_leader: UserId,
    ) -> Result<bool, RepositoryError> {
        (**self).replace_vault_leader(trip_id, expected, new_leader).await
    }
}
