use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use tripvault_core::{IntentId, TripId};

use super::parse_id;
use crate::app::dto;
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub async fn create_intent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::CreateIntentBody>,
) -> ApiResult<impl IntoResponse> {
    let handle = services
        .vault
        .create_payment_intent(body.split_id, user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(dto::IntentHandleView::from(&handle))))
}

pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(intent_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let result = services
        .vault
        .confirm_payment(&IntentId::new(intent_id), user.user_id())
        .await?;
    Ok(Json(dto::SettlementResultView::from(result)))
}

pub async fn transaction_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(trip_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let trip_id: TripId = parse_id("trip id", &trip_id)?;
    let records = services.vault.transaction_history(trip_id, user.user_id()).await?;
    let items = records.iter().map(dto::SettlementView::from).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })))
}

pub async fn unpaid_splits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::UnpaidSplitsQuery>,
) -> ApiResult<impl IntoResponse> {
    let splits = services.vault.unpaid_splits(user.user_id(), query.trip_id).await?;
    let items = splits.iter().map(dto::UnpaidSplitView::from).collect::<Vec<_>>();
    Ok(Json(json!({ "items": items })))
}
