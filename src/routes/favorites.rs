use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use crate::db::papers::{favorite_papers, fetch_paper};
use crate::error::{ApiError, ApiResult, ok};
use crate::routes::auth::current_user;
use crate::state::AppState;

pub fn favorites_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_favorites))
        .route("/{paper_id}", post(add_favorite).delete(remove_favorite))
}

async fn list_favorites(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &headers).await?;
    let papers = favorite_papers(&state.pool, user.id).await?;
    Ok(ok(papers))
}

async fn add_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(paper_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &headers).await?;
    if fetch_paper(&state.pool, &paper_id).await?.is_none() {
        return Err(ApiError::NotFound("Paper not found".into()));
    }

    sqlx::query("INSERT OR IGNORE INTO user_favorites (user_id, paper_id, created_at) VALUES (?, ?, ?)")
        .bind(user.id)
        .bind(&paper_id)
        .bind(Utc::now())
        .execute(&state.pool)
        .await?;

    Ok((StatusCode::CREATED, ok(json!({ "paper_id": paper_id, "favorited": true }))))
}

async fn remove_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(paper_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = current_user(&state, &headers).await?;

    let result = sqlx::query("DELETE FROM user_favorites WHERE user_id = ? AND paper_id = ?")
        .bind(user.id)
        .bind(&paper_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Favorite not found".into()));
    }
    Ok(ok(json!({ "paper_id": paper_id, "favorited": false })))
}
