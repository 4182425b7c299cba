//! Repository registration and re-sync endpoints.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use tracing::{info, instrument};

use super::AppState;
use super::response::{ApiError, ApiResult, Envelope};
use crate::ingest::IngestError;
use crate::types::Repository;

#[derive(Debug, Default, Deserialize)]
pub struct FetchRepoQuery {
    pub repo: Option<String>,
}

/// `GET /api/v1/fetch-repo?repo=owner/name`
///
/// Registers the repository and queues its sync. Returns once queued.
///
/// | Outcome                               | Status |
/// |---------------------------------------|--------|
/// | queued                                | 200    |
/// | `repo` missing, blank or malformed    | 400    |
/// | unknown to GitHub                     | 404    |
/// | GitHub, storage or dispatcher failure | 500    |
#[instrument(skip(state))]
pub async fn fetch_repo_handler(
    State(state): State<AppState>,
    Query(query): Query<FetchRepoQuery>,
) -> ApiResult<()> {
    let name = query
        .repo
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing repo param".to_string()))?;

    let repository = state.pipeline().register_repository(&name).await?;
    info!(repo = %repository.full_name, "Sync queued");
    Ok(Json(Envelope::message("success")))
}

/// `GET /api/v1/repos`
///
/// Tracked repositories with their metadata and checkpoint, oldest registration first.
pub async fn list_repos_handler(State(state): State<AppState>) -> ApiResult<Vec<Repository>> {
    let repositories = state.pipeline().storage().list_repositories().await?;
    Ok(Json(Envelope::success(repositories)))
}

/// `POST /api/v1/resync`
///
/// Queues a sync of every tracked repository now instead of at the next tick.
#[instrument(skip(state))]
pub async fn resync_handler(State(state): State<AppState>) -> ApiResult<usize> {
    let scheduled = state.pipeline().resync_all().await.map_err(|e| match e {
        IngestError::NotFound(msg) => ApiError::BadRequest(msg),
        other => ApiError::from(other),
    })?;
    Ok(Json(Envelope::success(scheduled)))
}
