//! In-memory repository with injectable faults, for failure-path tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use tripvault_core::{EntryId, IntentId, SplitId, TripId, UserId};
use tripvault_vault::{
    CasOutcome, IntentStatus, PaymentIntentRecord, SettlementRecord, UnpaidSplit, VaultEntry, VaultSplit,
};

use super::{DeleteOutcome, InMemoryVaultRepository, RepositoryError, VaultRepository};

/// Forwards to an [`InMemoryVaultRepository`] unless a fault is armed.
#[derive(Debug)]
pub struct FaultyVaultRepository {
    inner: Arc<InMemoryVaultRepository>,
    fail_settlements: AtomicBool,
    settle_before_delete: Mutex<Option<SettlementRecord>>,
}

impl FaultyVaultRepository {
    pub fn new(inner: Arc<InMemoryVaultRepository>) -> Self {
        Self {
            inner,
            fail_settlements: AtomicBool::new(false),
            settle_before_delete: Mutex::new(None),
        }
    }

    /// The wrapped store, for inspecting state without faults.
    pub fn inner(&self) -> &Arc<InMemoryVaultRepository> {
        &self.inner
    }

    /// While armed, `set_split_paid_if_unpaid` fails with a storage error and
    /// writes nothing.
    pub fn fail_settlements(&self, fail: bool) {
        self.fail_settlements.store(fail, Ordering::SeqCst);
    }

    /// Apply `record` immediately before the next `delete_entry`, the way a
    /// webhook landing between the caller's checks and the delete would.
    pub fn settle_before_next_delete(&self, record: SettlementRecord) -> Result<(), RepositoryError> {
        *self.settle_before_delete.lock().map_err(poisoned)? = Some(record);
        Ok(())
    }
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Storage("fault lock poisoned".to_string())
}

#[async_trait::async_trait]
impl VaultRepository for FaultyVaultRepository {
    async fn create_entry_with_splits(&self, entry: VaultEntry) -> Result<VaultEntry, RepositoryError> {
        self.inner.create_entry_with_splits(entry).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<VaultEntry>, RepositoryError> {
        self.inner.get_entry(id).await
    }

    async fn list_entries(&self, trip_id: TripId) -> Result<Vec<VaultEntry>, RepositoryError> {
        self.inner.list_entries(trip_id).await
    }

    async fn delete_entry(&self, id: EntryId, live_after: DateTime<Utc>) -> Result<DeleteOutcome, RepositoryError> {
        let racing = self.settle_before_delete.lock().map_err(poisoned)?.take();
        if let Some(record) = racing {
            self.inner.set_split_paid_if_unpaid(&record).await?;
        }
        self.inner.delete_entry(id, live_after).await
    }

    async fn get_split(&self, split_id: SplitId) -> Result<Option<(VaultEntry, VaultSplit)>, RepositoryError> {
        self.inner.get_split(split_id).await
    }

    async fn set_split_paid_if_unpaid(&self, record: &SettlementRecord) -> Result<CasOutcome, RepositoryError> {
        if self.fail_settlements.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("connection reset during settlement".to_string()));
        }
        self.inner.set_split_paid_if_unpaid(record).await
    }

    async fn list_unpaid_splits_for_user(
        &self,
        user: UserId,
        trip_id: Option<TripId>,
    ) -> Result<Vec<UnpaidSplit>, RepositoryError> {
        self.inner.list_unpaid_splits_for_user(user, trip_id).await
    }

    async fn insert_intent(
        &self,
        intent: &PaymentIntentRecord,
        observed_latest: Option<&IntentId>,
    ) -> Result<bool, RepositoryError> {
        self.inner.insert_intent(intent, observed_latest).await
    }

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        self.inner.get_intent(id).await
    }

    async fn latest_intent_for_split(
        &self,
        split_id: SplitId,
    ) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        self.inner.latest_intent_for_split(split_id).await
    }

    async fn update_intent_status(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.update_intent_status(id, status, failure_message, at).await
    }

    async fn list_settlements(&self, trip_id: TripId) -> Result<Vec<SettlementRecord>, RepositoryError> {
        self.inner.list_settlements(trip_id).await
    }

    async fn vault_leader(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        self.inner.vault_leader(trip_id).await
    }

    async fn replace_vault_leader(
        &self,
        trip_id: TripId,
        expected: Option<UserId>,
        new_leader: UserId,
    ) -> Result<bool, RepositoryError> {
        self.inner.replace_vault_leader(trip_id, expected, new_leader).await
    }
}
