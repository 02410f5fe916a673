//! Split allocation: turn an amount and a strategy into per-participant shares.
//!
//! Every strategy returns shares ordered by user id whose minor-unit amounts sum
//! exactly to the input amount. Rounding residue is handed out one minor unit
//! at a time in ascending user-id order.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tripvault_core::{Money, UserId, VaultError, VaultResult};

/// Percentages may drift this far from 100 before the split is rejected.
pub const PERCENTAGE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// One participant's input for a percentage or custom split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInput {
    pub user_id: UserId,
    /// Percent (for `Percentage`) or major-unit amount (for `Custom`).
    pub value: Decimal,
}

impl ShareInput {
    pub fn new(user_id: UserId, value: Decimal) -> Self {
        Self { user_id, value }
    }
}

/// How an entry's amount is divided between participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SplitMode {
    /// Even split. An empty list means "every trip participant".
    Equal { participants: Vec<UserId> },
    Percentage { shares: Vec<ShareInput> },
    Custom { shares: Vec<ShareInput> },
}

impl SplitMode {
    pub fn kind(&self) -> SplitKind {
        match self {
            SplitMode::Equal { .. } => SplitKind::Equal,
            SplitMode::Percentage { .. } => SplitKind::Percentage,
            SplitMode::Custom { .. } => SplitKind::Custom,
        }
    }

    /// Users named by the split inputs (may be empty for `Equal`).
    pub fn participants(&self) -> Vec<UserId> {
        match self {
            SplitMode::Equal { participants } => participants.clone(),
            SplitMode::Percentage { shares } | SplitMode::Custom { shares } => {
                shares.iter().map(|s| s.user_id).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    Equal,
    Percentage,
    Custom,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::Equal => "equal",
            SplitKind::Percentage => "percentage",
            SplitKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> VaultResult<Self> {
        match s {
            "equal" => Ok(SplitKind::Equal),
            "percentage" => Ok(SplitKind::Percentage),
            "custom" => Ok(SplitKind::Custom),
            other => Err(VaultError::validation(format!("unknown split mode '{other}'"))),
        }
    }
}

/// Allocated share in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub user_id: UserId,
    pub amount_minor: i64,
}

/// Allocate `amount` according to `mode`.
pub fn allocate(amount: &Money, mode: &SplitMode) -> VaultResult<Vec<Share>> {
    if amount.amount_minor <= 0 {
        return Err(VaultError::validation("amount must be positive"));
    }

    match mode {
        SplitMode::Equal { participants } => allocate_equal(amount.amount_minor, participants),
        SplitMode::Percentage { shares } => allocate_percentage(amount.amount_minor, shares),
        SplitMode::Custom { shares } => allocate_custom(amount, shares),
    }
}

fn ensure_unique(users: impl IntoIterator<Item = UserId>) -> VaultResult<()> {
    let mut seen = BTreeSet::new();
    for user in users {
        if !seen.insert(user) {
            return Err(VaultError::validation(format!(
                "participant {user} appears more than once"
            )));
        }
    }
    Ok(())
}

fn sorted_inputs(shares: &[ShareInput]) -> VaultResult<Vec<ShareInput>> {
    if shares.is_empty() {
        return Err(VaultError::EmptyParticipantSet);
    }
    ensure_unique(shares.iter().map(|s| s.user_id))?;
    if let Some(neg) = shares.iter().find(|s| s.value.is_sign_negative() && !s.value.is_zero()) {
        return Err(VaultError::validation(format!(
            "share for {} must not be negative",
            neg.user_id
        )));
    }
    let mut sorted = shares.to_vec();
    sorted.sort_by_key(|s| s.user_id);
    Ok(sorted)
}

fn allocate_equal(amount: i64, participants: &[UserId]) -> VaultResult<Vec<Share>> {
    if participants.is_empty() {
        return Err(VaultError::EmptyParticipantSet);
    }
    ensure_unique(participants.iter().copied())?;

    let mut users = participants.to_vec();
    users.sort();

    let n = users.len() as i64;
    let base = amount / n;
    let remainder = (amount % n) as usize;

    Ok(users
        .into_iter()
        .enumerate()
        .map(|(i, user_id)| Share {
            user_id,
            amount_minor: base + i64::from(i < remainder),
        })
        .collect())
}

fn allocate_percentage(amount: i64, shares: &[ShareInput]) -> VaultResult<Vec<Share>> {
    let inputs = sorted_inputs(shares)?;

    let total: Decimal = inputs.iter().map(|s| s.value).sum();
    if (total - Decimal::ONE_HUNDRED).abs() >= PERCENTAGE_TOLERANCE {
        return Err(VaultError::split_mismatch(format!(
            "percentages sum to {total}, expected 100"
        )));
    }

    // Scale every percentage to a common integer weight so the floor is exact.
    let scale = inputs.iter().map(|s| s.value.scale()).max().unwrap_or(0);
    let weights = inputs
        .iter()
        .map(|s| {
            let mut v = s.value;
            v.rescale(scale);
            v.mantissa()
        })
        .collect::<Vec<i128>>();
    let weight_total: i128 = weights.iter().sum();

    let mut allocated = Vec::with_capacity(inputs.len());
    for (input, weight) in inputs.iter().zip(&weights) {
        let share = (amount as i128)
            .checked_mul(*weight)
            .map(|v| v / weight_total)
            .ok_or_else(|| VaultError::validation("percentage precision too high for amount"))?;
        allocated.push(Share {
            user_id: input.user_id,
            amount_minor: share as i64,
        });
    }

    let assigned: i64 = allocated.iter().map(|s| s.amount_minor).sum();
    let eligible = weights.iter().map(|w| *w > 0).collect::<Vec<_>>();
    distribute_residual(&mut allocated, &eligible, amount - assigned);
    Ok(allocated)
}

fn allocate_custom(amount: &Money, shares: &[ShareInput]) -> VaultResult<Vec<Share>> {
    let inputs = sorted_inputs(shares)?;

    let total: Decimal = inputs.iter().map(|s| s.value).sum();
    let expected = amount.to_decimal();
    if (total - expected).abs() >= amount.currency.epsilon() {
        return Err(VaultError::split_mismatch(format!(
            "custom amounts sum to {total}, expected {expected}"
        )));
    }

    let mut allocated = Vec::with_capacity(inputs.len());
    for input in &inputs {
        allocated.push(Share {
            user_id: input.user_id,
            amount_minor: Money::minor_units_rounded(input.value, &amount.currency)?,
        });
    }

    let assigned: i64 = allocated.iter().map(|s| s.amount_minor).sum();
    let eligible = inputs.iter().map(|s| !s.value.is_zero()).collect::<Vec<_>>();
    distribute_residual(&mut allocated, &eligible, amount.amount_minor - assigned);
    Ok(allocated)
}

/// Hand out `residual` minor units one at a time in share order, skipping
/// ineligible shares and never taking a share below zero.
fn distribute_residual(shares: &mut [Share], eligible: &[bool], mut residual: i64) {
    if shares.is_empty() {
        return;
    }
    let eligible = if eligible.iter().any(|e| *e) {
        eligible.to_vec()
    } else {
        vec![true; shares.len()]
    };

    let step = residual.signum();
    let mut i = 0usize;
    let mut idle = 0usize;
    while residual != 0 && idle < shares.len() {
        let share = &mut shares[i % shares.len()];
        if eligible[i % eligible.len()] && share.amount_minor + step >= 0 {
            share.amount_minor += step;
            residual -= step;
            idle = 0;
        } else {
            idle += 1;
        }
        i += 1;
    }
}
