use std::sync::Arc;

use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use tripvault_core::{TripId, UserId};

use super::TripDirectory;
use crate::repository::RepositoryError;

const DEV_SCHEMA: &str = include_str!("../../migrations/0002_trip_directory.sql");

/// Reads the `trips` / `trip_participants` tables owned by the trips service.
#[derive(Debug, Clone)]
pub struct PostgresTripDirectory {
    pool: Arc<PgPool>,
}

impl PostgresTripDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the trip tables when running without the trips service.
    #[instrument(skip(self), err)]
    pub async fn ensure_dev_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(DEV_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| storage("ensure_dev_schema", e))?;
        Ok(())
    }
}

fn storage(operation: &str, err: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("sqlx error in {operation}: {err}"))
}

#[async_trait::async_trait]
impl TripDirectory for PostgresTripDirectory {
    #[instrument(skip(self), fields(trip_id = %trip_id), err)]
    async fn participants(&self, trip_id: TripId) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM trip_participants WHERE trip_id = $1
            UNION
            SELECT created_by FROM trips WHERE id = $1
            "#,
        )
        .bind(trip_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| storage("participants", e))?;

        let mut users = ids.into_iter().map(UserId::from_uuid).collect::<Vec<_>>();
        users.sort();
        Ok(users)
    }

    #[instrument(skip(self), fields(trip_id = %trip_id), err)]
    async fn creator(&self, trip_id: TripId) -> Result<Option<UserId>, RepositoryError> {
        let creator: Option<Uuid> = sqlx::query_scalar("SELECT created_by FROM trips WHERE id = $1")
            .bind(trip_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| storage("creator", e))?;
        Ok(creator.map(UserId::from_uuid))
    }
}
