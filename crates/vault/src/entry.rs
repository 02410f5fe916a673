use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tripvault_core::{EntryId, Money, SplitId, TripId, UserId, VaultError, VaultResult};

use crate::split::{SplitKind, SplitMode, allocate};

/// Category used when the caller does not supply one.
pub const DEFAULT_CATEGORY: &str = "general";
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_CATEGORY_LEN: usize = 64;

/// How a split reached the paid state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettledVia {
    Processor,
    Manual,
}

impl SettledVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettledVia::Processor => "processor",
            SettledVia::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> VaultResult<Self> {
        match s {
            "processor" => Ok(SettledVia::Processor),
            "manual" => Ok(SettledVia::Manual),
            other => Err(VaultError::validation(format!("unknown settlement method '{other}'"))),
        }
    }
}

/// One participant's share of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSplit {
    pub id: SplitId,
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub amount_minor: i64,
    /// One-way: false -> true.
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled_via: Option<SettledVia>,
    /// False for shares only the trip leader can mark paid.
    #[serde(default = "default_payable")]
    pub processor_payable: bool,
}

fn default_payable() -> bool {
    true
}

/// A logged shared expense together with its splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: EntryId,
    pub trip_id: TripId,
    pub description: String,
    pub amount: Money,
    pub paid_by: UserId,
    pub category: String,
    pub split_kind: SplitKind,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub splits: Vec<VaultSplit>,
}

impl VaultEntry {
    pub fn split(&self, split_id: SplitId) -> Option<&VaultSplit> {
        self.splits.iter().find(|s| s.id == split_id)
    }

    pub fn has_paid_splits(&self) -> bool {
        self.splits.iter().any(|s| s.paid)
    }

    /// Split amount in the entry's currency.
    pub fn split_amount(&self, split: &VaultSplit) -> Money {
        self.amount.with_amount(split.amount_minor)
    }

    /// Sum of the split amounts equals the entry amount.
    pub fn is_balanced(&self) -> bool {
        self.splits.iter().map(|s| s.amount_minor as i128).sum::<i128>()
            == self.amount.amount_minor as i128
    }
}

/// Request to record an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub trip_id: TripId,
    pub description: String,
    pub amount: Money,
    pub paid_by: UserId,
    pub category: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub split: SplitMode,
    /// Applied to every split; false keeps the entry out of processor payments.
    #[serde(default = "default_payable")]
    pub processor_payable: bool,
}

impl NewEntry {
    /// Field-level validation (does not run the allocator).
    pub fn validate(&self) -> VaultResult<()> {
        if !self.amount.is_positive() {
            return Err(VaultError::validation("amount must be positive"));
        }
        if self.amount.amount_minor > Money::MAX_ENTRY_MINOR {
            return Err(VaultError::validation(format!(
                "amount exceeds the per-entry maximum of {}",
                self.amount.with_amount(Money::MAX_ENTRY_MINOR)
            )));
        }

        let description = self.description.trim();
        if description.is_empty() {
            return Err(VaultError::validation("description must not be empty"));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(VaultError::validation(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        if let Some(category) = &self.category {
            if category.trim().chars().count() > MAX_CATEGORY_LEN {
                return Err(VaultError::validation(format!(
                    "category must be at most {MAX_CATEGORY_LEN} characters"
                )));
            }
        }

        Ok(())
    }

    /// Validate, allocate and materialise the entry with fresh ids.
    ///
    /// Zero-amount shares are not materialised as splits.
    pub fn build(&self, now: DateTime<Utc>) -> VaultResult<VaultEntry> {
        self.validate()?;
        let shares = allocate(&self.amount, &self.split)?;

        let entry_id = EntryId::new();
        let splits = shares
            .into_iter()
            .filter(|s| s.amount_minor > 0)
            .map(|s| VaultSplit {
                id: SplitId::new(),
                entry_id,
                user_id: s.user_id,
                amount_minor: s.amount_minor,
                paid: false,
                paid_at: None,
                settled_via: None,
                processor_payable: self.processor_payable,
            })
            .collect();

        let category = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        Ok(VaultEntry {
            id: entry_id,
            trip_id: self.trip_id,
            description: self.description.trim().to_string(),
            amount: self.amount.clone(),
            paid_by: self.paid_by,
            category,
            split_kind: self.split.kind(),
            occurred_at: self.occurred_at.unwrap_or(now),
            created_at: now,
            splits,
        })
    }
}
