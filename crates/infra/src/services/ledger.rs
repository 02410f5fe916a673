use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::instrument;

use tripvault_auth::{AuthzError, VaultAction};
use tripvault_core::{Currency, EntryId, Money, SplitId, TripId, UserId, VaultError, VaultResult};
use tripvault_vault::{
    CasOutcome, NewEntry, SettlementRecord, SplitMode, TripSummary, UnpaidSplit, VaultEntry, summarize,
};

use super::VaultService;
use crate::repository::DeleteOutcome;

/// Input for [`VaultService::create_entry`], amounts in major units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEntryRequest {
    pub trip_id: TripId,
    pub description: String,
    pub amount: Decimal,
    /// Falls back to the configured default currency.
    pub currency: Option<Currency>,
    pub category: Option<String>,
    pub split: SplitMode,
    /// Defaults to the acting user.
    pub paid_by: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// False records a cash expense that only the leader can mark settled.
    pub processor_payable: bool,
}

impl VaultService {
    /// Record an expense and its splits atomically.
    #[instrument(skip(self, request), fields(trip_id = %request.trip_id, actor = %actor), err)]
    pub async fn create_entry(&self, actor: UserId, request: CreateEntryRequest) -> VaultResult<VaultEntry> {
        let currency = request
            .currency
            .unwrap_or_else(|| self.settings.default_currency.clone());
        let mut new_entry = NewEntry {
            trip_id: request.trip_id,
            description: request.description,
            amount: Money::from_decimal(request.amount, currency)?,
            paid_by: request.paid_by.unwrap_or(actor),
            category: request.category,
            occurred_at: request.occurred_at,
            split: request.split,
            processor_payable: request.processor_payable,
        };
        new_entry.validate()?;

        let ctx = self.policy_context(new_entry.trip_id).await?;

        if let SplitMode::Equal { participants } = &mut new_entry.split {
            if participants.is_empty() {
                participants.extend(ctx.participants.iter().copied());
            }
        }

        tripvault_auth::authorize(
            &ctx,
            actor,
            &VaultAction::CreateEntry {
                split_kind: new_entry.split.kind(),
                paid_by: new_entry.paid_by,
                split_users: new_entry.split.participants(),
            },
        )?;

        let entry = new_entry.build(Self::now())?;
        let entry = self.repo.create_entry_with_splits(entry).await?;

        tracing::info!(
            entry_id = %entry.id,
            amount = %entry.amount,
            split_kind = entry.split_kind.as_str(),
            splits = entry.splits.len(),
            "vault entry recorded"
        );
        Ok(entry)
    }

    #[instrument(skip(self), fields(trip_id = %trip_id, actor = %actor), err)]
    pub async fn list_entries(&self, trip_id: TripId, actor: UserId) -> VaultResult<Vec<VaultEntry>> {
        self.authorize(trip_id, actor, VaultAction::ViewLedger).await?;
        Ok(self.repo.list_entries(trip_id).await?)
    }

    #[instrument(skip(self), fields(entry_id = %entry_id, actor = %actor), err)]
    pub async fn get_entry(&self, entry_id: EntryId, actor: UserId) -> VaultResult<VaultEntry> {
        let entry = self
            .repo
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("entry {entry_id}")))?;
        self.authorize(entry.trip_id, actor, VaultAction::ViewLedger).await?;
        Ok(entry)
    }

    /// Totals, balances and the requester's unpaid splits for a trip.
    #[instrument(skip(self), fields(trip_id = %trip_id, actor = %actor), err)]
    pub async fn trip_summary(&self, trip_id: TripId, actor: UserId) -> VaultResult<TripSummary> {
        self.authorize(trip_id, actor, VaultAction::ViewLedger).await?;
        let entries = self.repo.list_entries(trip_id).await?;
        summarize(trip_id, entries, actor)
    }

    /// Hard-delete an entry. Refused once any split is paid or while a
    /// payment for one of its splits is in flight.
    #[instrument(skip(self), fields(entry_id = %entry_id, actor = %actor), err)]
    pub async fn delete_entry(&self, entry_id: EntryId, actor: UserId) -> VaultResult<()> {
        let entry = self
            .repo
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("entry {entry_id}")))?;

        self.authorize(
            entry.trip_id,
            actor,
            VaultAction::DeleteEntry {
                entry_payer: entry.paid_by,
                has_paid_splits: entry.has_paid_splits(),
            },
        )
        .await?;

        // The repository re-checks paid flags and live intents under its own
        // lock, so a settlement landing after the policy check still wins.
        let live_after = Self::now() - self.settings.intent_ttl;
        match self.repo.delete_entry(entry_id, live_after).await? {
            DeleteOutcome::Deleted => {
                tracing::info!(trip_id = %entry.trip_id, "vault entry deleted");
                Ok(())
            }
            DeleteOutcome::Missing => Err(VaultError::not_found(format!("entry {entry_id}"))),
            DeleteOutcome::HasPaidSplits => {
                tracing::warn!(trip_id = %entry.trip_id, "split settled while entry was being deleted");
                Err(AuthzError::EntryHasPaidSplits.into())
            }
            DeleteOutcome::PaymentInFlight { split_id, intent_id } => {
                Err(VaultError::SettlementInProgress { split_id, intent_id })
            }
        }
    }

    /// Leader override: mark a split paid without a processor payment.
    ///
    /// Returns `true` only for the call that performed the transition.
    #[instrument(skip(self), fields(split_id = %split_id, actor = %actor), err)]
    pub async fn mark_split_paid(&self, split_id: SplitId, actor: UserId) -> VaultResult<bool> {
        let (entry, split) = self
            .repo
            .get_split(split_id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("split {split_id}")))?;

        self.authorize(entry.trip_id, actor, VaultAction::MarkSplitPaid).await?;

        if split.user_id == entry.paid_by {
            return Err(VaultError::validation("the payer's own share cannot be settled"));
        }
        if split.paid {
            return Ok(false);
        }

        let record = SettlementRecord::manual(&entry, &split, actor, Self::now());
        match self.repo.set_split_paid_if_unpaid(&record).await? {
            CasOutcome::Applied => {
                tracing::info!(
                    trip_id = %entry.trip_id,
                    amount = %record.amount,
                    "split marked paid by vault leader"
                );
                Ok(true)
            }
            CasOutcome::AlreadyPaid => Ok(false),
        }
    }

    /// Splits `user` can pay through the processor, optionally restricted to
    /// one trip. Manual-only splits appear in the trip summary instead.
    #[instrument(skip(self), fields(user = %user), err)]
    pub async fn unpaid_splits(&self, user: UserId, trip_id: Option<TripId>) -> VaultResult<Vec<UnpaidSplit>> {
        if let Some(trip_id) = trip_id {
            self.authorize(trip_id, user, VaultAction::ViewLedger).await?;
        }
        Ok(self.repo.list_unpaid_splits_for_user(user, trip_id).await?)
    }
}
