use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{ChatModel, ChatReply, ChatRequest, LlmError};
use crate::metrics::{ApiCallRecord, record_api_call};

/// Wraps a model and writes one `api_logs` row per call. Logging failures are ignored.
pub struct LoggedChatModel {
    inner: Arc<dyn ChatModel>,
    pool: SqlitePool,
}

impl LoggedChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, pool: SqlitePool) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl ChatModel for LoggedChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let started = Instant::now();
        let result = self.inner.complete(request).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let record = match &result {
            Ok(reply) => ApiCallRecord {
                function_name: request.function,
                response_status: 200,
                tokens_used: reply.total_tokens,
                duration_ms,
                error_message: None,
            },
            Err(error) => ApiCallRecord {
                function_name: request.function,
                response_status: error.log_status(),
                tokens_used: None,
                duration_ms,
                error_message: Some(error.to_string()),
            },
        };

        if let Err(error) = record_api_call(&self.pool, record).await {
            tracing::warn!(function = request.function, "Failed to record API call: {}", error);
        }

        result
    }
}
