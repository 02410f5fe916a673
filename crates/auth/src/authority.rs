use std::collections::BTreeSet;

use thiserror::Error;

use tripvault_core::{TripId, UserId, VaultError};
use tripvault_vault::SplitKind;

/// Everything a vault authorization decision depends on.
///
/// Construction is decoupled from storage: the service layer resolves the
/// current leader and the trip's participants and hands them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPolicyContext {
    pub trip_id: TripId,
    pub leader: UserId,
    pub participants: BTreeSet<UserId>,
}

impl VaultPolicyContext {
    pub fn new(trip_id: TripId, leader: UserId, participants: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            trip_id,
            leader,
            participants: participants.into_iter().collect(),
        }
    }

    pub fn is_leader(&self, user: UserId) -> bool {
        self.leader == user
    }

    /// The leader always counts as a participant.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.is_leader(user) || self.participants.contains(&user)
    }
}

/// A vault mutation or read that needs an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultAction {
    ViewLedger,
    CreateEntry {
        split_kind: SplitKind,
        paid_by: UserId,
        split_users: Vec<UserId>,
    },
    DeleteEntry {
        entry_payer: UserId,
        has_paid_splits: bool,
    },
    MarkSplitPaid,
    TransferLeadership {
        new_leader: UserId,
    },
    PaySplit {
        split_owner: UserId,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("user {user_id} is not a participant of trip {trip_id}")]
    NotParticipant { user_id: UserId, trip_id: TripId },

    #[error("only the vault leader may {0}")]
    LeaderOnly(&'static str),

    #[error("only the vault leader or the entry's payer may delete it")]
    NotEntryOwner,

    #[error("only the participant who owes a split may pay it")]
    NotSplitOwner,

    #[error("entries with paid splits cannot be deleted")]
    EntryHasPaidSplits,
}

impl From<AuthzError> for VaultError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::NotParticipant { user_id, trip_id } => {
                VaultError::NotParticipant { user_id, trip_id }
            }
            err @ AuthzError::EntryHasPaidSplits => VaultError::Validation(err.to_string()),
            other => VaultError::Authorization(other.to_string()),
        }
    }
}

/// Decide whether `actor` may perform `action` in the trip described by `ctx`.
///
/// - No IO
/// - No panics
pub fn authorize(ctx: &VaultPolicyContext, actor: UserId, action: &VaultAction) -> Result<(), AuthzError> {
    let result = check(ctx, actor, action);
    if let Err(err) = &result {
        tracing::debug!(trip_id = %ctx.trip_id, actor = %actor, ?action, error = %err, "vault action denied");
    }
    result
}

fn check(ctx: &VaultPolicyContext, actor: UserId, action: &VaultAction) -> Result<(), AuthzError> {
    require_participant(ctx, actor)?;

    match action {
        VaultAction::ViewLedger => Ok(()),

        VaultAction::CreateEntry {
            split_kind,
            paid_by,
            split_users,
        } => {
            if *split_kind != SplitKind::Equal && !ctx.is_leader(actor) {
                return Err(AuthzError::LeaderOnly("create percentage or custom splits"));
            }
            if *paid_by != actor && !ctx.is_leader(actor) {
                return Err(AuthzError::LeaderOnly("record expenses paid by someone else"));
            }
            require_participant(ctx, *paid_by)?;
            for user in split_users {
                require_participant(ctx, *user)?;
            }
            Ok(())
        }

        VaultAction::DeleteEntry {
            entry_payer,
            has_paid_splits,
        } => {
            if !ctx.is_leader(actor) && *entry_payer != actor {
                return Err(AuthzError::NotEntryOwner);
            }
            if *has_paid_splits {
                return Err(AuthzError::EntryHasPaidSplits);
            }
            Ok(())
        }

        VaultAction::MarkSplitPaid => {
            if !ctx.is_leader(actor) {
                return Err(AuthzError::LeaderOnly("mark splits as paid"));
            }
            Ok(())
        }

        VaultAction::TransferLeadership { new_leader } => {
            if !ctx.is_leader(actor) {
                return Err(AuthzError::LeaderOnly("transfer vault leadership"));
            }
            require_participant(ctx, *new_leader)
        }

        VaultAction::PaySplit { split_owner } => {
            if *split_owner != actor {
                return Err(AuthzError::NotSplitOwner);
            }
            Ok(())
        }
    }
}

fn require_participant(ctx: &VaultPolicyContext, user: UserId) -> Result<(), AuthzError> {
    if ctx.is_participant(user) {
        Ok(())
    } else {
        Err(AuthzError::NotParticipant {
            user_id: user,
            trip_id: ctx.trip_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId::from_uuid(Uuid::from_u128(n))
    }

    /// Leader 1, participants 1..=3.
    fn ctx() -> VaultPolicyContext {
        VaultPolicyContext::new(TripId::new(), user(1), [user(1), user(2), user(3)])
    }

    fn create(kind: SplitKind, paid_by: UserId) -> VaultAction {
        VaultAction::CreateEntry {
            split_kind: kind,
            paid_by,
            split_users: vec![user(1), user(2)],
        }
    }

    #[test]
    fn any_participant_may_log_equal_split_they_paid() {
        assert!(authorize(&ctx(), user(2), &create(SplitKind::Equal, user(2))).is_ok());
    }

    #[test]
    fn custom_and_percentage_splits_require_leader() {
        let ctx = ctx();
        for kind in [SplitKind::Custom, SplitKind::Percentage] {
            assert_eq!(
                authorize(&ctx, user(2), &create(kind, user(2))),
                Err(AuthzError::LeaderOnly("create percentage or custom splits"))
            );
            assert!(authorize(&ctx, user(1), &create(kind, user(1))).is_ok());
        }
    }

    #[test]
    fn paying_on_behalf_of_someone_else_requires_leader() {
        let ctx = ctx();
        assert!(authorize(&ctx, user(2), &create(SplitKind::Equal, user(3))).is_err());
        assert!(authorize(&ctx, user(1), &create(SplitKind::Equal, user(3))).is_ok());
    }

    #[test]
    fn outsiders_are_rejected_everywhere() {
        let ctx = ctx();
        let outsider = user(99);
        let err = authorize(&ctx, outsider, &VaultAction::ViewLedger).unwrap_err();
        assert!(matches!(err, AuthzError::NotParticipant { .. }));

        let action = VaultAction::CreateEntry {
            split_kind: SplitKind::Equal,
            paid_by: user(2),
            split_users: vec![user(2), outsider],
        };
        assert_eq!(
            authorize(&ctx, user(2), &action),
            Err(AuthzError::NotParticipant {
                user_id: outsider,
                trip_id: ctx.trip_id
            })
        );
    }

    #[test]
    fn only_leader_transfers_and_only_to_participants() {
        let ctx = ctx();
        let to_3 = VaultAction::TransferLeadership { new_leader: user(3) };
        assert!(matches!(authorize(&ctx, user(2), &to_3), Err(AuthzError::LeaderOnly(_))));
        assert!(authorize(&ctx, user(1), &to_3).is_ok());

        let to_outsider = VaultAction::TransferLeadership { new_leader: user(42) };
        assert!(matches!(
            authorize(&ctx, user(1), &to_outsider),
            Err(AuthzError::NotParticipant { .. })
        ));
    }

    #[test]
    fn deletion_rules() {
        let ctx = ctx();
        let by_2 = VaultAction::DeleteEntry {
            entry_payer: user(2),
            has_paid_splits: false,
        };
        assert!(authorize(&ctx, user(2), &by_2).is_ok());
        assert!(authorize(&ctx, user(1), &by_2).is_ok());
        assert_eq!(authorize(&ctx, user(3), &by_2), Err(AuthzError::NotEntryOwner));

        let paid = VaultAction::DeleteEntry {
            entry_payer: user(2),
            has_paid_splits: true,
        };
        let err: VaultError = authorize(&ctx, user(1), &paid).unwrap_err().into();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn manual_override_and_payment_gates() {
        let ctx = ctx();
        let err: VaultError = authorize(&ctx, user(2), &VaultAction::MarkSplitPaid)
            .unwrap_err()
            .into();
        assert!(matches!(err, VaultError::Authorization(_)));
        assert!(authorize(&ctx, user(1), &VaultAction::MarkSplitPaid).is_ok());

        let pay = VaultAction::PaySplit { split_owner: user(2) };
        assert!(authorize(&ctx, user(2), &pay).is_ok());
        assert_eq!(authorize(&ctx, user(3), &pay), Err(AuthzError::NotSplitOwner));
    }
}
