//! HTTP surface of the ingestion service.
//!
//! # Endpoints
//!
//! - `GET /api/v1/fetch-repo?repo=owner/name` - register a repository and queue its sync
//! - `GET /api/v1/top-commit-authors?page=&page_size=` - authors by commit count
//! - `GET /api/v1/commits?repo_name=&page=&page_size=` - a repository's commits, newest first
//! - `GET /api/v1/repos` - tracked repositories
//! - `POST /api/v1/resync` - queue a sync of every tracked repository
//! - `GET /health` - liveness
//!
//! Everything under `/api/v1` answers with the [`Envelope`] JSON shape.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::ingest::Pipeline;

mod health;
mod queries;
mod repos;
mod response;

pub use health::health_handler;
pub use queries::{AuthorsPage, CommitsPage, commits_handler, parse_page, top_authors_handler};
pub use repos::{fetch_repo_handler, list_repos_handler, resync_handler};
pub use response::{ApiError, ApiResult, Envelope, Pagination};

/// Shared application state, handed to handlers through axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        AppState { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// Builds the router with all endpoints and request tracing.
pub fn build_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/fetch-repo", get(fetch_repo_handler))
        .route("/top-commit-authors", get(top_authors_handler))
        .route("/commits", get(commits_handler))
        .route("/repos", get(list_repos_handler))
        .route("/resync", post(resync_handler));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
