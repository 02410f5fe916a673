use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    response::IntoResponse,
};

use tripvault_core::TripId;

use super::parse_id;
use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub async fn vault_leader(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let leader_id = services.vault.vault_leader(trip_id, user.user_id()).await?;
    Ok(Json(dto::LeaderView { trip_id, leader_id }))
}

pub async fn transfer_leader(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
    Json(body): Json<dto::TransferLeaderBody>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let leader_id = services
        .vault
        .transfer_leader(trip_id, body.new_leader, user.user_id())
        .await?;
    Ok(Json(dto::LeaderView { trip_id, leader_id }))
}
