//! Storage administration endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::config::ConcurrencyMode;
use crate::storage::{ListOptions, ListResult};
use crate::AppState;

/// Which provider is active.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub provider: &'static str,
    pub r2_configured: bool,
    pub optimistic_writes: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/storage - Active provider.
pub async fn storage_status(State(state): State<AppState>) -> ApiResult<StorageStatus> {
    let repo = state.store.repository();
    success(StorageStatus {
        provider: repo.backend().provider(),
        r2_configured: state.config.storage.is_r2_configured(),
        optimistic_writes: repo.mode() == ConcurrencyMode::Optimistic,
    })
}

/// GET /api/storage/objects - List stored objects.
pub async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResult> {
    let listing = state
        .store
        .repository()
        .backend()
        .list(&ListOptions {
            prefix: query.prefix,
            limit: query.limit,
        })
        .await?;

    success(listing)
}
