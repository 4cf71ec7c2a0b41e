use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use serde_json::json;

use super::json_body;
use crate::error::{ApiError, ApiResult, ok};
use crate::metrics::{record_visit, visitor_hash};
use crate::state::AppState;

const MAX_PATH_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct VisitInput {
    path: String,
    #[serde(default)]
    user_id: Option<i64>,
}

pub fn visits_routes() -> Router<AppState> {
    Router::new().route("/", post(track_visit))
}

/// First hop of `X-Forwarded-For`, or `X-Real-IP`.
fn client_address(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
}

async fn track_visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VisitInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let path = input.path.trim();
    if path.is_empty() || path.chars().count() > MAX_PATH_CHARS {
        return Err(ApiError::BadRequest("Invalid path".into()));
    }

    let hash = client_address(&headers).map(|client| {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        visitor_hash(client, user_agent)
    });

    record_visit(&state.pool, path, input.user_id, hash.as_deref()).await?;
    Ok((StatusCode::CREATED, ok(json!({ "recorded": true }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_address(&headers), Some("203.0.113.7"));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_address(&headers), None);
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_address(&headers), Some("10.0.0.9"));
    }
}
