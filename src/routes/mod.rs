pub mod admin;
pub mod analysis;
pub mod auth;
pub mod favorites;
pub mod papers;
pub mod settings;
pub mod visits;

use axum::{
    Router,
    extract::{
        Json, Path, Query,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

pub use admin::admin_routes;
pub use analysis::analysis_routes;
pub use auth::auth_routes;
pub use favorites::favorites_routes;
pub use papers::{papers_routes, tags_routes};
pub use settings::settings_routes;
pub use visits::visits_routes;

use crate::error::{ApiError, ApiResult, ok};
use crate::state::AppState;

/// Every JSON API route, still waiting for its state.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/api/auth", auth_routes())
        .nest("/api/papers", papers_routes())
        .nest("/api/tags", tags_routes())
        .nest("/api/favorites", favorites_routes())
        .nest("/api/settings", settings_routes())
        .nest("/api/visits", visits_routes())
        .nest("/api/admin", admin_routes())
        .merge(analysis_routes())
        .route("/api/health", get(health_check))
}

async fn health_check() -> impl IntoResponse {
    ok(json!({ "status": "healthy" }))
}

/// Turns a body rejection into the failure envelope instead of axum's plain text.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Same as [`json_body`] for query strings.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub(crate) fn path_param<T>(path: Result<Path<T>, PathRejection>) -> ApiResult<T> {
    path.map(|Path(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
