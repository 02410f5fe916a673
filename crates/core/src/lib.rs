//! `tripvault-core` — vault foundation building blocks.
//!
//! This crate contains **pure** primitives shared by every other crate
//! (identifiers, money, the error taxonomy). No infrastructure concerns.

pub mod error;
pub mod id;
pub mod money;

pub use error::{VaultError, VaultResult};
pub use id::{EntryId, IntentId, SettlementId, SplitId, TripId, UserId};
pub use money::{Currency, Money};
