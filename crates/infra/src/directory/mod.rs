//! Trip directory: who belongs to a trip and who created it.
//!
//! Trips are owned by another part of the platform; the vault only reads them.

mod postgres;

pub use postgres::PostgresTripDirectory;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tripvault_core::{TripId, UserId};

use crate::repository::RepositoryError;

#[async_trait::async_trait]
pub trait TripDirectory: Send + Sync {
    /// Current participants (empty if the trip is unknown).
    async fn participants(&self, trip_id: TripId) -> Result<Vec<UserId>, RepositoryError>;

    /// Trip creator; `None` means the trip does not exist.
    async fn creator(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError>;
}

#[async_trait::async_trait]
impl<S> TripDirectory for Arc<S>
where
    S: TripDirectory + ?Sized,
{
    async fn participants(&self, trip_id: TripId) -> Result<Vec<UserId>, RepositoryError> {
        (**self).participants(trip_id).await
    }

    async fn creator(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        (**self).creator(trip_id).await
    }
}

#[derive(Debug, Clone)]
struct TripRecord {
    creator: UserId,
    participants: BTreeSet<UserId>,
}

/// In-memory trip directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTripDirectory {
    trips: RwLock<HashMap<TripId, TripRecord>>,
}

impl InMemoryTripDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trip. The creator is always a participant.
    pub fn add_trip(
        &self,
        trip_id: TripId,
        creator: UserId,
        participants: impl IntoIterator<Item = UserId>,
    ) -> Result<(), RepositoryError> {
        let mut members: BTreeSet<UserId> = participants.into_iter().collect();
        members.insert(creator);
        self.trips
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?
            .insert(
                trip_id,
                TripRecord {
                    creator,
                    participants: members,
                },
            );
        Ok(())
    }

    pub fn add_participant(&self, trip_id: TripId, user: UserId) -> Result<(), RepositoryError> {
        let mut trips = self
            .trips
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        let trip = trips
            .get_mut(&trip_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("trip {trip_id}")))?;
        trip.participants.insert(user);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TripDirectory for InMemoryTripDirectory {
    async fn participants(&self, trip_id: TripId) -> Result<Vec<UserId>, RepositoryError> {
        let trips = self
            .trips
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        Ok(trips
            .get(&trip_id)
            .map(|t| t.participants.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn creator(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        let trips = self
            .trips
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        Ok(trips.get(&trip_id).map(|t| t.creator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creator_is_always_a_participant() {
        let dir = InMemoryTripDirectory::new();
        let (trip, creator, other) = (TripId::new(), UserId::new(), UserId::new());
        dir.add_trip(trip, creator, [other]).unwrap();

        let participants = dir.participants(trip).await.unwrap();
        assert!(participants.contains(&creator));
        assert!(participants.contains(&other));
        assert_eq!(dir.creator(trip).await.unwrap(), Some(creator));
    }

    #[tokio::test]
    async fn unknown_trip_has_no_creator_or_members() {
        let dir = InMemoryTripDirectory::new();
        let trip = TripId::new();
        assert_eq!(dir.creator(trip).await.unwrap(), None);
        assert!(dir.participants(trip).await.unwrap().is_empty());
        assert!(matches!(
            dir.add_participant(trip, UserId::new()),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
