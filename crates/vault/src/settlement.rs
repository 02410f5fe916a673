//! Settlement state machine and the records it produces.
//!
//! ```text
//! Unpaid --intent--> PaymentPending --success--> Paid
//! PaymentPending --failure/cancel--> Unpaid
//! Unpaid | PaymentPending --manual override--> Paid
//! ```
//!
//! `Paid` is terminal. The state is derived from `split.paid` plus the latest
//! payment intent recorded for the split.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tripvault_core::{
    EntryId, IntentId, Money, SettlementId, SplitId, TripId, UserId, VaultError, VaultResult,
};

use crate::entry::{SettledVia, VaultEntry, VaultSplit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
            IntentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> VaultResult<Self> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "succeeded" => Ok(IntentStatus::Succeeded),
            "failed" => Ok(IntentStatus::Failed),
            "canceled" => Ok(IntentStatus::Canceled),
            other => Err(VaultError::validation(format!("unknown intent status '{other}'"))),
        }
    }
}

/// Correlation record between a processor payment intent and a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentRecord {
    pub id: IntentId,
    pub split_id: SplitId,
    pub trip_id: TripId,
    pub payer_id: UserId,
    pub recipient_id: UserId,
    pub amount: Money,
    pub status: IntentStatus,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentIntentRecord {
    /// Pending for longer than `ttl`; no longer blocks a retry.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == IntentStatus::Pending && now - self.created_at >= ttl
    }

    pub fn blocks_new_intent(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == IntentStatus::Pending && !self.is_stale(now, ttl)
    }
}

/// Metadata attached to a processor intent so webhooks can be correlated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub split_id: SplitId,
    pub trip_id: TripId,
    pub payer_id: UserId,
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SplitState {
    Unpaid,
    PaymentPending { intent_id: IntentId },
    Paid,
}

/// Derive the state of `split` from its paid flag and latest intent.
pub fn split_state(
    split: &VaultSplit,
    latest_intent: Option<&PaymentIntentRecord>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> SplitState {
    if split.paid {
        return SplitState::Paid;
    }
    match latest_intent {
        Some(intent) if intent.blocks_new_intent(now, ttl) => SplitState::PaymentPending {
            intent_id: intent.id.clone(),
        },
        _ => SplitState::Unpaid,
    }
}

/// Check that a new payment may be started for `split`.
pub fn ensure_payable(
    entry: &VaultEntry,
    split: &VaultSplit,
    latest_intent: Option<&PaymentIntentRecord>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> VaultResult<()> {
    match split_state(split, latest_intent, now, ttl) {
        SplitState::Paid => Err(VaultError::AlreadySettled(split.id)),
        SplitState::PaymentPending { intent_id } => Err(VaultError::SettlementInProgress {
            split_id: split.id,
            intent_id,
        }),
        SplitState::Unpaid if split.user_id == entry.paid_by => Err(VaultError::validation(
            "the payer's own share cannot be settled",
        )),
        SplitState::Unpaid if !split.processor_payable => Err(VaultError::validation(format!(
            "split {} can only be marked paid by the trip leader",
            split.id
        ))),
        SplitState::Unpaid => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementMethod {
    Processor { intent_id: IntentId },
    Manual { marked_by: UserId },
}

impl SettlementMethod {
    pub fn settled_via(&self) -> SettledVia {
        match self {
            SettlementMethod::Processor { .. } => SettledVia::Processor,
            SettlementMethod::Manual { .. } => SettledVia::Manual,
        }
    }

    pub fn intent_id(&self) -> Option<&IntentId> {
        match self {
            SettlementMethod::Processor { intent_id } => Some(intent_id),
            SettlementMethod::Manual { .. } => None,
        }
    }
}

/// Charge the processor reports for a successful intent.
///
/// Both fields are optional on the wire; a missing fee is recorded as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeDetails {
    pub charge_id: Option<String>,
    pub fee_minor: Option<i64>,
}

/// Transaction history record; exactly one per paid split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: SettlementId,
    pub trip_id: TripId,
    pub entry_id: EntryId,
    pub split_id: SplitId,
    pub payer_id: UserId,
    pub recipient_id: UserId,
    pub amount: Money,
    pub method: SettlementMethod,
    pub recorded_at: DateTime<Utc>,
    /// Processor settlements only.
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub fee_minor: Option<i64>,
    /// `amount - fee`, what reaches the recipient.
    #[serde(default)]
    pub net_minor: Option<i64>,
}

impl SettlementRecord {
    fn for_split(
        entry: &VaultEntry,
        split: &VaultSplit,
        method: SettlementMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SettlementId::new(),
            trip_id: entry.trip_id,
            entry_id: entry.id,
            split_id: split.id,
            payer_id: split.user_id,
            recipient_id: entry.paid_by,
            amount: entry.split_amount(split),
            method,
            recorded_at: now,
            charge_id: None,
            fee_minor: None,
            net_minor: None,
        }
    }

    pub fn for_processor(
        entry: &VaultEntry,
        split: &VaultSplit,
        intent_id: IntentId,
        charge: &ChargeDetails,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::for_split(entry, split, SettlementMethod::Processor { intent_id }, now);
        let fee = charge.fee_minor.unwrap_or(0);
        record.charge_id = charge.charge_id.clone();
        record.fee_minor = Some(fee);
        record.net_minor = Some(record.amount.amount_minor.saturating_sub(fee));
        record
    }

    pub fn manual(entry: &VaultEntry, split: &VaultSplit, marked_by: UserId, now: DateTime<Utc>) -> Self {
        Self::for_split(entry, split, SettlementMethod::Manual { marked_by }, now)
    }
}

/// Result of a compare-and-set on `split.paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    AlreadyPaid,
}

/// Processor event after signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    Succeeded {
        intent_id: IntentId,
        metadata: Option<IntentMetadata>,
        #[serde(default)]
        charge: ChargeDetails,
    },
    Failed {
        intent_id: IntentId,
        message: Option<String>,
    },
    Canceled {
        intent_id: IntentId,
    },
    Other {
        kind: String,
    },
}

/// What a webhook delivery did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied { split_id: SplitId },
    AlreadyApplied { split_id: SplitId },
    IntentClosed { intent_id: IntentId, status: IntentStatus },
    Ignored { kind: String },
}

/// Returned to the payer when a payment is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentHandle {
    pub intent_id: IntentId,
    pub client_secret: String,
    pub amount: Money,
}

/// Result of confirming a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub intent_id: IntentId,
    pub split_id: SplitId,
    pub status: IntentStatus,
    /// True only for the call that moved the split to paid.
    pub newly_applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NewEntry;
    use crate::split::SplitMode;
    use tripvault_core::Currency;
    use uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId::from_uuid(Uuid::from_u128(n))
    }

    fn fixture() -> (VaultEntry, VaultSplit, VaultSplit) {
        let entry = NewEntry {
            trip_id: TripId::new(),
            description: "Hotel".to_string(),
            amount: Money::new(6000, Currency::usd()),
            paid_by: user(1),
            category: None,
            occurred_at: None,
            split: SplitMode::Equal {
                participants: vec![user(1), user(2)],
            },
            processor_payable: true,
        }
        .build(Utc::now())
        .unwrap();
        let own = entry.splits[0].clone();
        let owed = entry.splits[1].clone();
        (entry, own, owed)
    }

    fn intent(split: &VaultSplit, created_at: DateTime<Utc>, status: IntentStatus) -> PaymentIntentRecord {
        PaymentIntentRecord {
            id: IntentId::new("pi_test"),
            split_id: split.id,
            trip_id: TripId::new(),
            payer_id: split.user_id,
            recipient_id: user(1),
            amount: Money::new(split.amount_minor, Currency::usd()),
            status,
            failure_message: None,
            created_at,
            completed_at: None,
        }
    }

    #[test]
    fn fresh_pending_intent_blocks_and_stale_one_does_not() {
        let (entry, _, owed) = fixture();
        let ttl = Duration::minutes(30);
        let now = Utc::now();

        let fresh = intent(&owed, now - Duration::minutes(5), IntentStatus::Pending);
        assert!(matches!(
            ensure_payable(&entry, &owed, Some(&fresh), now, ttl),
            Err(VaultError::SettlementInProgress { .. })
        ));

        let stale = intent(&owed, now - Duration::minutes(31), IntentStatus::Pending);
        assert!(stale.is_stale(now, ttl));
        assert_eq!(split_state(&owed, Some(&stale), now, ttl), SplitState::Unpaid);
        assert!(ensure_payable(&entry, &owed, Some(&stale), now, ttl).is_ok());

        let failed = intent(&owed, now, IntentStatus::Failed);
        assert!(ensure_payable(&entry, &owed, Some(&failed), now, ttl).is_ok());
    }

    #[test]
    fn paid_split_and_self_split_are_not_payable() {
        let (entry, own, mut owed) = fixture();
        let ttl = Duration::minutes(30);
        let now = Utc::now();

        assert!(matches!(
            ensure_payable(&entry, &own, None, now, ttl),
            Err(VaultError::Validation(_))
        ));

        owed.paid = true;
        assert_eq!(
            ensure_payable(&entry, &owed, None, now, ttl),
            Err(VaultError::AlreadySettled(owed.id))
        );
    }

    #[test]
    fn settlement_record_points_from_split_owner_to_entry_payer() {
        let (entry, _, owed) = fixture();
        let record = SettlementRecord::manual(&entry, &owed, user(1), Utc::now());

        assert_eq!(record.payer_id, user(2));
        assert_eq!(record.recipient_id, user(1));
        assert_eq!(record.amount.amount_minor, 3000);
        assert_eq!(record.method.settled_via(), SettledVia::Manual);
        assert!(record.method.intent_id().is_none());
        assert_eq!((record.charge_id, record.fee_minor, record.net_minor), (None, None, None));
    }

    #[test]
    fn processor_settlement_records_fee_and_net() {
        let (entry, _, owed) = fixture();
        let charge = ChargeDetails {
            charge_id: Some("ch_1".to_string()),
            fee_minor: Some(117),
        };
        let record = SettlementRecord::for_processor(&entry, &owed, IntentId::new("pi_1"), &charge, Utc::now());
        assert_eq!(record.charge_id.as_deref(), Some("ch_1"));
        assert_eq!(record.fee_minor, Some(117));
        assert_eq!(record.net_minor, Some(3000 - 117));

        let unreported =
            SettlementRecord::for_processor(&entry, &owed, IntentId::new("pi_2"), &ChargeDetails::default(), Utc::now());
        assert_eq!(unreported.charge_id, None);
        assert_eq!(unreported.fee_minor, Some(0));
        assert_eq!(unreported.net_minor, Some(3000));
    }

    #[test]
    fn manual_only_split_cannot_start_a_payment() {
        let (entry, _, mut owed) = fixture();
        owed.processor_payable = false;
        assert!(matches!(
            ensure_payable(&entry, &owed, None, Utc::now(), Duration::minutes(30)),
            Err(VaultError::Validation(_))
        ));
    }
}
