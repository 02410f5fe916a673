use tracing::instrument;

use tripvault_auth::{VaultAction, authorize};
use tripvault_core::{TripId, UserId, VaultError, VaultResult};

use super::VaultService;

impl VaultService {
    /// Current vault leader: the last transfer target, else the trip creator.
    #[instrument(skip(self), fields(trip_id = %trip_id, actor = %actor), err)]
    pub async fn vault_leader(&self, trip_id: TripId, actor: UserId) -> VaultResult<UserId> {
        let ctx = self.authorize(trip_id, actor, VaultAction::ViewLedger).await?;
        Ok(ctx.leader)
    }

    pub async fn is_leader(&self, trip_id: TripId, user: UserId) -> VaultResult<bool> {
        Ok(self.policy_context(trip_id).await?.is_leader(user))
    }

    /// Hand vault leadership to another participant.
    ///
    /// Returns the leader after the call. Transferring to the current leader
    /// is a no-op.
    #[instrument(skip(self), fields(trip_id = %trip_id, actor = %actor, new_leader = %new_leader), err)]
    pub async fn transfer_leader(&self, trip_id: TripId, new_leader: UserId, actor: UserId) -> VaultResult<UserId> {
        let (ctx, stored) = self.load_policy(trip_id).await?;
        authorize(&ctx, actor, &VaultAction::TransferLeadership { new_leader })?;

        if ctx.is_leader(new_leader) {
            return Ok(new_leader);
        }

        if !self.repo.replace_vault_leader(trip_id, stored, new_leader).await? {
            return Err(VaultError::conflict(format!(
                "vault leader of trip {trip_id} changed concurrently"
            )));
        }
        tracing::info!(previous = %ctx.leader, "vault leadership transferred");
        Ok(new_leader)
    }
}
