use axum::{
    Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use super::query_params;
use crate::db::papers::{fetch_analysis, fetch_deep_analysis, fetch_paper, fetch_tags, list_papers, popular_tags};
use crate::error::{ApiError, ApiResult, ok};
use crate::models::{PaperDetailResponse, PaperQuery};
use crate::state::AppState;

const DEFAULT_POPULAR_TAGS: i64 = 10;
const MAX_POPULAR_TAGS: i64 = 50;

pub fn papers_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_papers))
        .route("/{paper_id}", get(get_paper))
}

pub fn tags_routes() -> Router<AppState> {
    Router::new().route("/popular", get(get_popular_tags))
}

// ============================
// GET /papers
// ============================
async fn get_papers(
    State(state): State<AppState>,
    query: Result<Query<PaperQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let query = query_params(query)?;
    let page = list_papers(&state.pool, &query).await?;
    Ok(ok(page))
}

// ============================
// GET /papers/{paper_id}
// ============================
async fn get_paper(
    State(state): State<AppState>,
    Path(paper_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let paper = fetch_paper(&state.pool, &paper_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Paper not found".into()))?;

    let analysis = fetch_analysis(&state.pool, &paper_id).await?;
    let deep_analysis = fetch_deep_analysis(&state.pool, &paper_id).await?;
    let tags = fetch_tags(&state.pool, &paper_id).await?;

    Ok(ok(PaperDetailResponse {
        paper,
        analysis,
        deep_analysis,
        tags,
    }))
}

#[derive(Debug, Deserialize)]
struct PopularTagsQuery {
    limit: Option<i64>,
}

// ============================
// GET /tags/popular
// ============================
async fn get_popular_tags(
    State(state): State<AppState>,
    query: Result<Query<PopularTagsQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let query = query_params(query)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_POPULAR_TAGS)
        .clamp(1, MAX_POPULAR_TAGS);
    let tags = popular_tags(&state.pool, limit).await?;
    Ok(ok(tags))
}
