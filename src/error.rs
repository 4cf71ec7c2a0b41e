use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::batch::BatchError;
use crate::feed::IngestError;
use crate::llm::LlmError;

/// Error returned by HTTP handlers; always rendered as the failure envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Upstream(String),
    #[error("model did not return valid JSON")]
    InvalidModelOutput,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::InvalidModelOutput => (StatusCode::BAD_GATEWAY, "INVALID_MODEL_OUTPUT"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, "request failed: {}", self);
        }
        let body = json!({
            "success": false,
            "error": { "code": code, "message": self.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

impl From<LlmError> for ApiError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::MissingApiKey => Self::Config(error.to_string()),
            LlmError::InvalidJson => Self::InvalidModelOutput,
            LlmError::Upstream { .. } | LlmError::Transport(_) | LlmError::EmptyReply => {
                Self::Upstream(error.to_string())
            }
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::PaperNotFound(_) => Self::NotFound(error.to_string()),
            AnalysisError::NoTags => Self::Upstream(error.to_string()),
            AnalysisError::Llm(inner) => inner.into(),
            AnalysisError::Database(inner) => Self::Database(inner),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        Self::Upstream(error.to_string())
    }
}

impl From<BatchError> for ApiError {
    fn from(error: BatchError) -> Self {
        match error {
            BatchError::Busy => Self::Conflict(error.to_string()),
            BatchError::Task(inner) => Self::Internal(inner.into()),
        }
    }
}

/// Success envelope: `{"success": true, "data": ...}`.
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn failures_render_uniform_envelope() {
        let (status, body) = render(ApiError::NotFound("Paper not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Paper not found");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let (status, body) = render(LlmError::MissingApiKey.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn upstream_text_is_surfaced_verbatim() {
        let error = LlmError::Upstream {
            status: 429,
            body: "rate limited".into(),
        };
        let (status, body) = render(error.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["message"], "DeepSeek error: rate limited");
    }

    #[tokio::test]
    async fn invalid_model_output_has_distinct_code() {
        let (_, body) = render(LlmError::InvalidJson.into()).await;
        assert_eq!(body["error"]["code"], "INVALID_MODEL_OUTPUT");
        assert_eq!(body["error"]["message"], "model did not return valid JSON");
    }
}
