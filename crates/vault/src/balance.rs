//! Balance calculation over a snapshot of a trip's entries.
//!
//! Pure functions only. Settlement flips `paid` flags but never moves balances:
//! `balance = paid - owed` is computed from entries and splits alone.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tripvault_core::{Currency, EntryId, Money, SplitId, TripId, UserId, VaultError, VaultResult};

use crate::entry::VaultEntry;

/// Net position of one participant in one currency (minor units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantBalance {
    pub user_id: UserId,
    pub currency: Currency,
    pub paid: i64,
    pub owed: i64,
    /// Positive: the group owes this user. Negative: this user owes the group.
    pub balance: i64,
}

/// A split the user still owes to someone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpaidSplit {
    pub split_id: SplitId,
    pub entry_id: EntryId,
    pub trip_id: TripId,
    pub description: String,
    pub amount: Money,
    pub owed_to: UserId,
    pub occurred_at: DateTime<Utc>,
    pub processor_payable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: TripId,
    /// One total per currency, ordered by currency code.
    pub total_expenses: Vec<Money>,
    pub entry_count: usize,
    pub entries: Vec<VaultEntry>,
    pub balances: Vec<ParticipantBalance>,
    pub unpaid_splits: Vec<UnpaidSplit>,
}

/// Narrow an accumulated total back to minor units.
fn to_minor(total: i128, currency: &Currency) -> VaultResult<i64> {
    i64::try_from(total).map_err(|_| {
        VaultError::validation(format!("trip totals in {currency} exceed the representable range"))
    })
}

/// Balances keyed by (currency, user), sorted by currency then user id.
///
/// Sums are taken in `i128`; a trip whose totals no longer fit minor units is
/// reported as an error rather than wrapped.
pub fn compute_balances(entries: &[VaultEntry]) -> VaultResult<Vec<ParticipantBalance>> {
    let mut ledger: BTreeMap<(Currency, UserId), (i128, i128)> = BTreeMap::new();

    for entry in entries {
        let currency = &entry.amount.currency;
        ledger
            .entry((currency.clone(), entry.paid_by))
            .or_default()
            .0 += i128::from(entry.amount.amount_minor);

        for split in &entry.splits {
            ledger
                .entry((currency.clone(), split.user_id))
                .or_default()
                .1 += i128::from(split.amount_minor);
        }
    }

    ledger
        .into_iter()
        .map(|((currency, user_id), (paid, owed))| {
            Ok(ParticipantBalance {
                paid: to_minor(paid, &currency)?,
                owed: to_minor(owed, &currency)?,
                balance: to_minor(paid - owed, &currency)?,
                user_id,
                currency,
            })
        })
        .collect()
}

/// Sum of entry amounts per currency.
pub fn total_expenses(entries: &[VaultEntry]) -> VaultResult<Vec<Money>> {
    let mut totals: BTreeMap<Currency, i128> = BTreeMap::new();
    for entry in entries {
        *totals.entry(entry.amount.currency.clone()).or_default() += i128::from(entry.amount.amount_minor);
    }
    totals
        .into_iter()
        .map(|(currency, amount)| Ok(Money::new(to_minor(amount, &currency)?, currency)))
        .collect()
}

/// Unpaid splits owed by `user` to another payer, in entry order.
///
/// The payer's own share is never listed.
pub fn unpaid_splits_for(entries: &[VaultEntry], user: UserId) -> Vec<UnpaidSplit> {
    entries
        .iter()
        .flat_map(|entry| {
            entry
                .splits
                .iter()
                .filter(move |s| s.user_id == user && !s.paid && s.user_id != entry.paid_by)
                .map(move |s| UnpaidSplit {
                    split_id: s.id,
                    entry_id: entry.id,
                    trip_id: entry.trip_id,
                    description: entry.description.clone(),
                    amount: entry.split_amount(s),
                    owed_to: entry.paid_by,
                    occurred_at: entry.occurred_at,
                    processor_payable: s.processor_payable,
                })
        })
        .collect()
}

/// The subset of [`unpaid_splits_for`] that may be paid through the processor.
pub fn processor_payable_splits_for(entries: &[VaultEntry], user: UserId) -> Vec<UnpaidSplit> {
    unpaid_splits_for(entries, user)
        .into_iter()
        .filter(|s| s.processor_payable)
        .collect()
}

/// Summary of a trip as seen by `requester`.
pub fn summarize(trip_id: TripId, entries: Vec<VaultEntry>, requester: UserId) -> VaultResult<TripSummary> {
    Ok(TripSummary {
        trip_id,
        total_expenses: total_expenses(&entries)?,
        entry_count: entries.len(),
        balances: compute_balances(&entries)?,
        unpaid_splits: unpaid_splits_for(&entries, requester),
        entries,
    })
}
