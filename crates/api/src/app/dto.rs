use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tripvault_core::{Currency, EntryId, IntentId, Money, SettlementId, SplitId, TripId, UserId, VaultError};
use tripvault_infra::CreateEntryRequest;
use tripvault_vault::{
    IntentStatus, ParticipantBalance, PaymentIntentHandle, SettlementMethod, SettlementRecord,
    SettlementResult, ShareInput, SplitKind, SplitMode, TripSummary, UnpaidSplit, VaultEntry, VaultSplit,
};

use crate::app::errors::ApiResult;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateEntryBody {
    pub description: String,
    /// Major units, as a JSON string or number.
    pub amount: Decimal,
    pub currency: Option<String>,
    pub category: Option<String>,
    /// `equal` (default), `percentage` or `custom`.
    pub split_mode: Option<String>,
    /// Participants (equal) or per-user percent / amount. Empty for an equal
    /// split over the whole trip.
    #[serde(default)]
    pub split_inputs: Vec<SplitInputBody>,
    pub paid_by: Option<UserId>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// `false` for cash expenses settled by the leader.
    #[serde(default = "default_true")]
    pub processor_payable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SplitInputBody {
    pub user_id: UserId,
    pub value: Option<Decimal>,
}

impl CreateEntryBody {
    pub fn into_request(self, trip_id: TripId) -> ApiResult<CreateEntryRequest> {
        let kind = match self.split_mode.as_deref() {
            None => SplitKind::Equal,
            Some(raw) => SplitKind::parse(raw)?,
        };

        let split = match kind {
            SplitKind::Equal => SplitMode::Equal {
                participants: self.split_inputs.iter().map(|i| i.user_id).collect(),
            },
            SplitKind::Percentage => SplitMode::Percentage {
                shares: share_inputs(&self.split_inputs)?,
            },
            SplitKind::Custom => SplitMode::Custom {
                shares: share_inputs(&self.split_inputs)?,
            },
        };

        let currency = self.currency.as_deref().map(Currency::new).transpose()?;

        Ok(CreateEntryRequest {
            trip_id,
            description: self.description,
            amount: self.amount,
            currency,
            category: self.category,
            split,
            paid_by: self.paid_by,
            occurred_at: self.occurred_at,
            processor_payable: self.processor_payable,
        })
    }
}

fn share_inputs(inputs: &[SplitInputBody]) -> Result<Vec<ShareInput>, VaultError> {
    inputs
        .iter()
        .map(|input| {
            input
                .value
                .map(|value| ShareInput::new(input.user_id, value))
                .ok_or_else(|| VaultError::validation(format!("split input for {} has no value", input.user_id)))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateIntentBody {
    pub split_id: SplitId,
}

#[derive(Debug, Deserialize)]
pub struct TransferLeaderBody {
    pub new_leader: UserId,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnpaidSplitsQuery {
    pub trip_id: Option<TripId>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct MoneyView {
    /// Major units, e.g. `"33.34"`.
    pub amount: String,
    pub currency: String,
}

impl From<&Money> for MoneyView {
    fn from(money: &Money) -> Self {
        Self {
            amount: money.to_decimal().to_string(),
            currency: money.currency.to_string(),
        }
    }
}

fn major(amount_minor: i64, currency: &Currency) -> String {
    Money::new(amount_minor, currency.clone()).to_decimal().to_string()
}

#[derive(Debug, Serialize)]
pub struct SplitView {
    pub id: SplitId,
    pub user_id: UserId,
    pub amount: String,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled_via: Option<&'static str>,
    pub processor_payable: bool,
}

impl SplitView {
    fn new(entry: &VaultEntry, split: &VaultSplit) -> Self {
        Self {
            id: split.id,
            user_id: split.user_id,
            amount: major(split.amount_minor, &entry.amount.currency),
            paid: split.paid,
            paid_at: split.paid_at,
            settled_via: split.settled_via.map(|via| via.as_str()),
            processor_payable: split.processor_payable,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub id: EntryId,
    pub trip_id: TripId,
    pub description: String,
    pub amount: MoneyView,
    pub paid_by: UserId,
    pub category: String,
    pub split_mode: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub splits: Vec<SplitView>,
}

impl From<&VaultEntry> for EntryView {
    fn from(entry: &VaultEntry) -> Self {
        Self {
            id: entry.id,
            trip_id: entry.trip_id,
            description: entry.description.clone(),
            amount: MoneyView::from(&entry.amount),
            paid_by: entry.paid_by,
            category: entry.category.clone(),
            split_mode: entry.split_kind.as_str(),
            occurred_at: entry.occurred_at,
            created_at: entry.created_at,
            splits: entry.splits.iter().map(|s| SplitView::new(entry, s)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub currency: String,
    pub paid: String,
    pub owed: String,
    pub balance: String,
}

impl From<&ParticipantBalance> for BalanceView {
    fn from(b: &ParticipantBalance) -> Self {
        Self {
            user_id: b.user_id,
            currency: b.currency.to_string(),
            paid: major(b.paid, &b.currency),
            owed: major(b.owed, &b.currency),
            balance: major(b.balance, &b.currency),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnpaidSplitView {
    pub split_id: SplitId,
    pub entry_id: EntryId,
    pub trip_id: TripId,
    pub description: String,
    pub amount: MoneyView,
    pub owed_to: UserId,
    pub occurred_at: DateTime<Utc>,
    pub processor_payable: bool,
}

impl From<&UnpaidSplit> for UnpaidSplitView {
    fn from(s: &UnpaidSplit) -> Self {
        Self {
            split_id: s.split_id,
            entry_id: s.entry_id,
            trip_id: s.trip_id,
            description: s.description.clone(),
            amount: MoneyView::from(&s.amount),
            owed_to: s.owed_to,
            occurred_at: s.occurred_at,
            processor_payable: s.processor_payable,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryView {
    pub trip_id: TripId,
    pub total_expenses: Vec<MoneyView>,
    pub entry_count: usize,
    pub entries: Vec<EntryView>,
    pub balances: Vec<BalanceView>,
    pub unpaid_splits: Vec<UnpaidSplitView>,
}

impl From<&TripSummary> for SummaryView {
    fn from(s: &TripSummary) -> Self {
        Self {
            trip_id: s.trip_id,
            total_expenses: s.total_expenses.iter().map(MoneyView::from).collect(),
            entry_count: s.entry_count,
            entries: s.entries.iter().map(EntryView::from).collect(),
            balances: s.balances.iter().map(BalanceView::from).collect(),
            unpaid_splits: s.unpaid_splits.iter().map(UnpaidSplitView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementView {
    pub id: SettlementId,
    pub trip_id: TripId,
    pub entry_id: EntryId,
    pub split_id: SplitId,
    pub payer_id: UserId,
    pub recipient_id: UserId,
    pub amount: MoneyView,
    pub method: &'static str,
    pub intent_id: Option<IntentId>,
    pub marked_by: Option<UserId>,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_amount: Option<String>,
}

impl From<&SettlementRecord> for SettlementView {
    fn from(r: &SettlementRecord) -> Self {
        let marked_by = match &r.method {
            SettlementMethod::Manual { marked_by } => Some(*marked_by),
            SettlementMethod::Processor { .. } => None,
        };
        Self {
            id: r.id,
            trip_id: r.trip_id,
            entry_id: r.entry_id,
            split_id: r.split_id,
            payer_id: r.payer_id,
            recipient_id: r.recipient_id,
            amount: MoneyView::from(&r.amount),
            method: r.method.settled_via().as_str(),
            intent_id: r.method.intent_id().cloned(),
            marked_by,
            recorded_at: r.recorded_at,
            charge_id: r.charge_id.clone(),
            fee: r.fee_minor.map(|fee| major(fee, &r.amount.currency)),
            net_amount: r.net_minor.map(|net| major(net, &r.amount.currency)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IntentHandleView {
    pub intent_id: IntentId,
    pub client_secret: String,
    pub amount: MoneyView,
}

impl From<&PaymentIntentHandle> for IntentHandleView {
    fn from(h: &PaymentIntentHandle) -> Self {
        Self {
            intent_id: h.intent_id.clone(),
            client_secret: h.client_secret.clone(),
            amount: MoneyView::from(&h.amount),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementResultView {
    pub intent_id: IntentId,
    pub split_id: SplitId,
    pub status: IntentStatus,
    pub newly_applied: bool,
}

impl From<SettlementResult> for SettlementResultView {
    fn from(r: SettlementResult) -> Self {
        Self {
            intent_id: r.intent_id,
            split_id: r.split_id,
            status: r.status,
            newly_applied: r.newly_applied,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaderView {
    pub trip_id: TripId,
    pub leader_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_body_maps_split_inputs_per_mode() {
        let a = UserId::new();
        let b = UserId::new();
        let trip = TripId::new();

        let body: CreateEntryBody = serde_json::from_value(json!({
            "description": "Taxi",
            "amount": "42.50",
            "currency": "eur",
            "split_mode": "custom",
            "split_inputs": [
                { "user_id": a, "value": "20.25" },
                { "user_id": b, "value": 22.25 }
            ]
        }))
        .unwrap();
        let req = body.into_request(trip).unwrap();
        assert_eq!(req.currency.unwrap().as_str(), "EUR");
        assert!(matches!(req.split, SplitMode::Custom { ref shares } if shares.len() == 2));

        let body: CreateEntryBody = serde_json::from_value(json!({
            "description": "Taxi",
            "amount": 10,
            "split_mode": "percentage",
            "split_inputs": [{ "user_id": a }]
        }))
        .unwrap();
        assert!(body.into_request(trip).is_err());
    }

    #[test]
    fn equal_is_the_default_mode() {
        let body: CreateEntryBody = serde_json::from_value(json!({
            "description": "Snacks",
            "amount": 9
        }))
        .unwrap();
        let req = body.into_request(TripId::new()).unwrap();
        assert_eq!(req.split, SplitMode::Equal { participants: vec![] });
        assert!(req.currency.is_none());
        assert!(req.processor_payable);
    }

    #[test]
    fn processor_settlements_show_fee_and_net() {
        let record = SettlementRecord {
            id: SettlementId::new(),
            trip_id: TripId::new(),
            entry_id: EntryId::new(),
            split_id: SplitId::new(),
            payer_id: UserId::new(),
            recipient_id: UserId::new(),
            amount: Money::new(3000, Currency::usd()),
            method: SettlementMethod::Processor {
                intent_id: IntentId::new("pi_1"),
            },
            recorded_at: Utc::now(),
            charge_id: Some("ch_1".to_string()),
            fee_minor: Some(117),
            net_minor: Some(2883),
        };
        let view = serde_json::to_value(SettlementView::from(&record)).unwrap();
        assert_eq!(view["charge_id"], "ch_1");
        assert_eq!(view["fee"], "1.17");
        assert_eq!(view["net_amount"], "28.83");

        let manual = SettlementRecord {
            method: SettlementMethod::Manual {
                marked_by: record.recipient_id,
            },
            charge_id: None,
            fee_minor: None,
            net_minor: None,
            ..record
        };
        let view = serde_json::to_value(SettlementView::from(&manual)).unwrap();
        assert!(view.get("fee").is_none());
        assert_eq!(view["method"], "manual");
    }

    #[test]
    fn money_is_rendered_in_major_units() {
        let view = MoneyView::from(&Money::new(3334, Currency::usd()));
        assert_eq!(view.amount, "33.34");
        let yen = MoneyView::from(&Money::new(1200, Currency::new("JPY").unwrap()));
        assert_eq!(yen.amount, "1200");
    }
}
