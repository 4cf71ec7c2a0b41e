//! Chat-completion client for the OpenAI-compatible DeepSeek API.

mod extract;
mod logged;
#[cfg(test)]
pub mod testing;

pub use extract::{extract_json_array, extract_json_object};
pub use logged::LoggedChatModel;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::LlmConfig;

pub const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("DeepSeek API key not configured")]
    MissingApiKey,
    #[error("Failed to call DeepSeek API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("DeepSeek error: {body}")]
    Upstream { status: u16, body: String },
    #[error("DeepSeek response does not contain message content")]
    EmptyReply,
    #[error("model did not return valid JSON")]
    InvalidJson,
}

impl LlmError {
    /// Status recorded in the API call log.
    pub fn log_status(&self) -> u16 {
        match self {
            Self::MissingApiKey => 0,
            Self::Upstream { status, .. } => *status,
            Self::Transport(error) => error.status().map(|s| s.as_u16()).unwrap_or(0),
            Self::EmptyReply | Self::InvalidJson => 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Logical operation name, used for call accounting.
    pub function: &'static str,
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(function: &'static str, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            function,
            system: system.into(),
            user: user.into(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub total_tokens: Option<i64>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, LlmError>;
}

pub struct DeepSeekClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl DeepSeekClient {
    pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl ChatModel for DeepSeekClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let api_key = self.config.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": request.temperature
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, function = request.function, "DeepSeek API error");
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: Value = response.json().await?;
        let content = payload
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyReply)?;

        let total_tokens = payload
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(|tokens| tokens.as_i64());

        Ok(ChatReply {
            content: content.to_string(),
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> DeepSeekClient {
        DeepSeekClient::new(
            reqwest::Client::new(),
            LlmConfig {
                api_key: api_key.map(str::to_string),
                base_url: server.uri(),
                model: "deepseek-chat".to_string(),
            },
        )
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test", "only JSON", "analyze this")
    }

    #[tokio::test]
    async fn returns_first_choice_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"a\":1}" } }],
                "usage": { "total_tokens": 42 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server, Some("sk-test"))
            .complete(&request())
            .await
            .unwrap();
        assert_eq!(reply.content, "{\"a\":1}");
        assert_eq!(reply.total_tokens, Some(42));
    }

    #[tokio::test]
    async fn missing_key_fails_without_calling_the_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let error = client_for(&server, None).complete(&request()).await.unwrap_err();
        assert!(matches!(error, LlmError::MissingApiKey));
    }

    #[tokio::test]
    async fn non_success_status_carries_upstream_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_string("Insufficient Balance"))
            .mount(&server)
            .await;

        let error = client_for(&server, Some("sk-test"))
            .complete(&request())
            .await
            .unwrap_err();
        match error {
            LlmError::Upstream { status, body } => {
                assert_eq!(status, 402);
                assert_eq!(body, "Insufficient Balance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_an_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let error = client_for(&server, Some("sk-test"))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(error, LlmError::EmptyReply));
    }
}
