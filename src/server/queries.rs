//! Read-only listings over ingested commits.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::response::{ApiError, ApiResult, Envelope, Pagination};
use crate::types::{AuthorCommitCount, Commit, Page, RepoName};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommitsQuery {
    pub repo_name: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorsPage {
    pub authors: Vec<AuthorCommitCount>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitsPage {
    pub commits: Vec<Commit>,
    pub pagination: Pagination,
}

fn positive(raw: Option<&str>, default: u32, field: &str) -> Result<u32, ApiError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid {field} value {v:?}"))),
    }
}

/// Parses `page`/`page_size`, defaulting to 1 and 10.
pub fn parse_page(page: Option<&str>, page_size: Option<&str>) -> Result<Page, ApiError> {
    let number = positive(page, Page::DEFAULT_PAGE, "page")?;
    let size = positive(page_size, Page::DEFAULT_PAGE_SIZE, "page_size")?;
    Page::new(number, size).ok_or_else(|| ApiError::BadRequest("invalid pagination".to_string()))
}

/// Cuts a fetched result (up to `page_size + 1` rows) down to the page.
fn paginate<T>(mut rows: Vec<T>, page: Page) -> (Vec<T>, Pagination) {
    let limit = page.page_size() as usize;
    let has_next = rows.len() > limit;
    rows.truncate(limit);
    let pagination = Pagination {
        page: page.page(),
        page_size: rows.len() as u32,
        has_next,
    };
    (rows, pagination)
}

/// `GET /api/v1/top-commit-authors?page=&page_size=`
///
/// Authors across every tracked repository, ranked by commit count with ties
/// broken by name. Non-numeric or non-positive paging gives 400.
///
/// ```ignore
/// {"code":0,"message":"success","data":{
///   "authors":[{"author":"Ada","commit_count":4}],
///   "pagination":{"page":1,"page_size":1,"has_next":true}}}
/// ```
pub async fn top_authors_handler(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<AuthorsPage> {
    let page = parse_page(query.page.as_deref(), query.page_size.as_deref())?;
    let rows = state
        .pipeline()
        .storage()
        .top_commit_authors(page.rows())
        .await?;
    let (authors, pagination) = paginate(rows, page);
    Ok(Json(Envelope::success(AuthorsPage {
        authors,
        pagination,
    })))
}

/// `GET /api/v1/commits?repo_name=owner/name&page=&page_size=`
///
/// One repository's commits ordered by commit date, newest first. A bad or
/// untracked `repo_name` gives 400.
pub async fn commits_handler(
    State(state): State<AppState>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<CommitsPage> {
    let raw = query
        .repo_name
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing repo_name".to_string()))?;
    let name = RepoName::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let page = parse_page(query.page.as_deref(), query.page_size.as_deref())?;

    let storage = state.pipeline().storage();
    let repository = storage
        .find_repository(&name)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("repository not found: {name}")))?;
    let rows = storage
        .commits_for_repository(repository.id, page.rows())
        .await?;
    let (commits, pagination) = paginate(rows, page);
    Ok(Json(Envelope::success(CommitsPage {
        commits,
        pagination,
    })))
}
