//! Vault domain: split allocation, balances and the settlement state machine.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod balance;
pub mod entry;
pub mod settlement;
pub mod split;

pub use balance::{
    ParticipantBalance, TripSummary, UnpaidSplit, compute_balances, processor_payable_splits_for,
    summarize, total_expenses, unpaid_splits_for,
};
pub use entry::{DEFAULT_CATEGORY, NewEntry, SettledVia, VaultEntry, VaultSplit};
pub use settlement::{
    CasOutcome, ChargeDetails, IntentMetadata, IntentStatus, PaymentIntentHandle, PaymentIntentRecord,
    SettlementMethod, SettlementRecord, SettlementResult, SplitState, WebhookEvent,
    WebhookOutcome, ensure_payable, split_state,
};
pub use split::{Share, ShareInput, SplitKind, SplitMode, allocate};
