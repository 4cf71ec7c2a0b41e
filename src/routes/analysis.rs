use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use super::json_body;
use crate::error::{ApiError, ApiResult, ok};
use crate::models::{DeepAnalysisRequest, ExtractTagsRequest};
use crate::state::AppState;

/// Mounted at the root; these paths mirror the public API names.
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/papers/{paper_id}/analyze", post(analyze_paper))
        .route("/api/deep-analysis", post(deep_analysis))
        .route("/api/extract-tags", post(extract_tags))
}

// ============================
// POST /papers/{paper_id}/analyze
// ============================
async fn analyze_paper(
    State(state): State<AppState>,
    Path(paper_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let analysis = state.analyzer.analyze_paper(&paper_id).await?;
    tracing::info!(%paper_id, "Paper analyzed");
    Ok(ok(analysis))
}

// ============================
// POST /deep-analysis
// ============================
async fn deep_analysis(
    State(state): State<AppState>,
    payload: Result<Json<DeepAnalysisRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let mut input = json_body(payload)?;
    input.paper_id = input.paper_id.trim().to_string();
    if input.paper_id.is_empty() {
        return Err(ApiError::BadRequest("missing paperId".into()));
    }

    let analysis = state.analyzer.deep_analyze(&input).await?;
    Ok(ok(analysis))
}

// ============================
// POST /extract-tags
// ============================
async fn extract_tags(
    State(state): State<AppState>,
    payload: Result<Json<ExtractTagsRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let tags = state
        .analyzer
        .suggest_tags(
            input.title.as_deref().unwrap_or(""),
            input.abstract_text.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(ok(json!({ "tags": tags })))
}
