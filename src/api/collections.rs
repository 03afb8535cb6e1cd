//! Collection API endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::Value;

use super::{success, ApiResponse, ApiResult};
use crate::errors::AppError;
use crate::models::{ActionRequest, CollectionKind, Record};
use crate::AppState;

fn parse_kind(name: &str) -> Result<CollectionKind, AppError> {
    name.parse().map_err(AppError::NotFound)
}

/// GET /api/collections/:kind - Current records of a collection.
pub async fn list_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Vec<Record>> {
    let kind = parse_kind(&kind)?;
    success(state.store.list(kind).await)
}

/// POST /api/collections/:kind/manage - Run an action against a collection.
pub async fn manage_collection(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Record> {
    let kind = parse_kind(&kind)?;
    let Json(body) =
        body.map_err(|e| AppError::InvalidAction(format!("Malformed request body: {}", e)))?;

    let action = ActionRequest::from_value(body)?.into_action(kind)?;
    let outcome = state.store.dispatch(kind, action).await?;

    Ok(ApiResponse::new(outcome.into_record()))
}
