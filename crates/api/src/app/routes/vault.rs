use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use tripvault_core::{EntryId, SplitId, TripId};

use super::parse_id;
use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub async fn create_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
    Json(body): Json<dto::CreateEntryBody>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let request = body.into_request(trip_id)?;
    let entry = services.vault.create_entry(user.user_id(), request).await?;
    Ok((StatusCode::CREATED, Json(dto::EntryView::from(&entry))))
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let entries = services.vault.list_entries(trip_id, user.user_id()).await?;
    let items = entries.iter().map(dto::EntryView::from).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })))
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(entry_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let entry_id: EntryId = parse_id("entry id", &entry_id)?;
    let entry = services.vault.get_entry(entry_id, user.user_id()).await?;
    Ok(Json(dto::EntryView::from(&entry)))
}

pub async fn delete_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(entry_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let entry_id: EntryId = parse_id("entry id", &entry_id)?;
    services.vault.delete_entry(entry_id, user.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn trip_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let summary = services.vault.trip_summary(trip_id, user.user_id()).await?;
    Ok(Json(dto::SummaryView::from(&summary)))
}

pub async fn mark_split_paid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(split_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let split_id: SplitId = parse_id("split id", &split_id)?;
    let applied = services.vault.mark_split_paid(split_id, user.user_id()).await?;
    Ok(Json(json!({ "split_id": split_id, "applied": applied })))
}
