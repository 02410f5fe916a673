use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use tripvault_core::{EntryId, IntentId, SplitId, TripId, UserId};
use tripvault_vault::{
    CasOutcome, IntentStatus, PaymentIntentRecord, SettlementRecord, UnpaidSplit, VaultEntry,
    VaultSplit, processor_payable_splits_for,
};

use super::{DeleteOutcome, RepositoryError, VaultRepository};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<EntryId, VaultEntry>,
    split_index: HashMap<SplitId, EntryId>,
    intents: HashMap<IntentId, PaymentIntentRecord>,
    /// Intent ids per split in insertion order (last = latest).
    intents_by_split: HashMap<SplitId, Vec<IntentId>>,
    settlements: BTreeMap<SplitId, SettlementRecord>,
    leaders: HashMap<TripId, UserId>,
}

impl State {
    fn latest_intent(&self, split_id: SplitId) -> Option<&PaymentIntentRecord> {
        self.intents_by_split
            .get(&split_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.intents.get(id))
    }

    fn split_mut(&mut self, split_id: SplitId) -> Option<&mut VaultSplit> {
        let entry_id = self.split_index.get(&split_id)?;
        self.entries
            .get_mut(entry_id)?
            .splits
            .iter_mut()
            .find(|s| s.id == split_id)
    }

    fn close_intent(&mut self, id: &IntentId, status: IntentStatus, message: Option<String>, at: DateTime<Utc>) -> bool {
        match self.intents.get_mut(id) {
            Some(intent) if intent.status == IntentStatus::Pending => {
                intent.status = status;
                intent.failure_message = message;
                intent.completed_at = Some(at);
                true
            }
            _ => false,
        }
    }

    fn trip_entries_newest_first(&self, trip_id: Option<TripId>) -> Vec<VaultEntry> {
        let mut entries = self
            .entries
            .values()
            .filter(|e| trip_id.is_none_or(|t| e.trip_id == t))
            .cloned()
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(a.id.cmp(&b.id)));
        entries
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A single lock guards all maps so every trait call
/// is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct InMemoryVaultRepository {
    state: RwLock<State>,
}

impl InMemoryVaultRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, RepositoryError> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, RepositoryError> {
        self.state
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl VaultRepository for InMemoryVaultRepository {
    async fn create_entry_with_splits(&self, entry: VaultEntry) -> Result<VaultEntry, RepositoryError> {
        let mut state = self.write()?;

        if state.entries.contains_key(&entry.id) {
            return Err(RepositoryError::Conflict(format!("entry {} already exists", entry.id)));
        }
        if let Some(split) = entry.splits.iter().find(|s| state.split_index.contains_key(&s.id)) {
            return Err(RepositoryError::Conflict(format!("split {} already exists", split.id)));
        }

        for split in &entry.splits {
            state.split_index.insert(split.id, entry.id);
        }
        state.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<VaultEntry>, RepositoryError> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    async fn list_entries(&self, trip_id: TripId) -> Result<Vec<VaultEntry>, RepositoryError> {
        Ok(self.read()?.trip_entries_newest_first(Some(trip_id)))
    }

    async fn delete_entry(&self, id: EntryId, live_after: DateTime<Utc>) -> Result<DeleteOutcome, RepositoryError> {
        let mut state = self.write()?;
        let Some(entry) = state.entries.get(&id) else {
            return Ok(DeleteOutcome::Missing);
        };
        if entry.has_paid_splits() {
            return Ok(DeleteOutcome::HasPaidSplits);
        }
        for split in &entry.splits {
            if let Some(intent) = state.latest_intent(split.id) {
                if intent.status == IntentStatus::Pending && intent.created_at > live_after {
                    return Ok(DeleteOutcome::PaymentInFlight {
                        split_id: split.id,
                        intent_id: intent.id.clone(),
                    });
                }
            }
        }

        let Some(entry) = state.entries.remove(&id) else {
            return Ok(DeleteOutcome::Missing);
        };

        for split in &entry.splits {
            state.split_index.remove(&split.id);
            state.settlements.remove(&split.id);
            for intent_id in state.intents_by_split.remove(&split.id).unwrap_or_default() {
                state.intents.remove(&intent_id);
            }
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn get_split(&self, split_id: SplitId) -> Result<Option<(VaultEntry, VaultSplit)>, RepositoryError> {
        let state = self.read()?;
        let found = state
            .split_index
            .get(&split_id)
            .and_then(|entry_id| state.entries.get(entry_id))
            .and_then(|entry| entry.split(split_id).map(|s| (entry.clone(), s.clone())));
        Ok(found)
    }

    async fn set_split_paid_if_unpaid(&self, record: &SettlementRecord) -> Result<CasOutcome, RepositoryError> {
        let mut state = self.write()?;

        let split = state
            .split_mut(record.split_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("split {}", record.split_id)))?;

        let outcome = if split.paid {
            CasOutcome::AlreadyPaid
        } else {
            split.paid = true;
            split.paid_at = Some(record.recorded_at);
            split.settled_via = Some(record.method.settled_via());
            CasOutcome::Applied
        };

        if outcome == CasOutcome::Applied {
            state.settlements.insert(record.split_id, record.clone());
        }
        if let Some(intent_id) = record.method.intent_id() {
            state.close_intent(intent_id, IntentStatus::Succeeded, None, record.recorded_at);
        }
        Ok(outcome)
    }

    async fn list_unpaid_splits_for_user(
        &self,
        user: UserId,
        trip_id: Option<TripId>,
    ) -> Result<Vec<UnpaidSplit>, RepositoryError> {
        let state = self.read()?;
        Ok(processor_payable_splits_for(&state.trip_entries_newest_first(trip_id), user))
    }

    async fn insert_intent(
        &self,
        intent: &PaymentIntentRecord,
        observed_latest: Option<&IntentId>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.write()?;

        let paid = state
            .split_mut(intent.split_id)
            .map(|s| s.paid)
            .ok_or_else(|| RepositoryError::NotFound(format!("split {}", intent.split_id)))?;
        if paid {
            return Ok(false);
        }
        if state.latest_intent(intent.split_id).map(|i| &i.id) != observed_latest {
            return Ok(false);
        }
        if state.intents.contains_key(&intent.id) {
            return Err(RepositoryError::Conflict(format!("intent {} already recorded", intent.id)));
        }

        state
            .intents_by_split
            .entry(intent.split_id)
            .or_default()
            .push(intent.id.clone());
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(true)
    }

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        Ok(self.read()?.intents.get(id).cloned())
    }

    async fn latest_intent_for_split(
        &self,
        split_id: SplitId,
    ) -> Result<Option<PaymentIntentRecord>, RepositoryError> {
        Ok(self.read()?.latest_intent(split_id).cloned())
    }

    async fn update_intent_status(
        &self,
        id: &IntentId,
        status: IntentStatus,
        failure_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.write()?;
        if !state.intents.contains_key(id) {
            return Err(RepositoryError::NotFound(format!("payment intent {id}")));
        }
        Ok(state.close_intent(id, status, failure_message, at))
    }

    async fn list_settlements(&self, trip_id: TripId) -> Result<Vec<SettlementRecord>, RepositoryError> {
        let state = self.read()?;
        let mut records = state
            .settlements
            .values()
            .filter(|r| r.trip_id == trip_id)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn vault_leader(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        Ok(self.read()?.leaders.get(&trip_id).copied())
    }

    async fn replace_vault_leader(
        &self,
        trip_id: TripId,
        expected: Option<UserId>,
        new_leader: UserId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.write()?;
        if state.leaders.get(&trip_id).copied() != expected {
            return Ok(false);
        }
        state.leaders.insert(trip_id, new_leader);
        Ok(true)
    }
}
