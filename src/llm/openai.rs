//! OpenAI-compatible chat and embeddings client.
//!
//! Works against any endpoint speaking the `/chat/completions` and
//! `/embeddings` wire format; the base URL is configurable for proxies and
//! self-hosted gateways.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, LlmError, LlmErrorKind};
use super::LlmClient;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for OpenAI-compatible APIs.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OpenAiClient {
    /// Create a new client with default models against the OpenAI endpoint.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Override the API base URL (no trailing slash).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the embedding model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Map an HTTP error response onto an [`LlmError`].
    fn create_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        let status_code = status.as_u16();
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => LlmError::rate_limited(body.to_string()),
            LlmErrorKind::ServerError => LlmError::server_error(status_code, body.to_string()),
            LlmErrorKind::ClientError => LlmError::client_error(status_code, body.to_string()),
            _ => LlmError::server_error(status_code, body.to_string()),
        }
    }

    /// POST a JSON payload and return the raw success body.
    async fn post_json<T: Serialize>(&self, path: &str, payload: &T) -> Result<String, LlmError> {
        let response = match self
            .client
            .post(format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(LlmError::network_error(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(LlmError::network_error(format!("Connection failed: {}", e)));
                } else {
                    return Err(LlmError::network_error(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(prompt, context),
            temperature: DEFAULT_TEMPERATURE,
        };
        let body = self.post_json("/chat/completions", &request).await?;
        parse_chat_body(&body)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: text.to_string(),
        };
        let body = self.post_json("/embeddings", &request).await?;
        parse_embedding_body(&body)
    }
}

/// Assemble chat messages, rendering `context` into a leading system message.
fn build_messages(prompt: &str, context: Option<&serde_json::Value>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(context) = context {
        let rendered =
            serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: format!("Context information:\n{}", rendered),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: prompt.to_string(),
    });
    messages
}

fn parse_chat_body(body: &str) -> Result<String, LlmError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))
}

fn parse_embedding_body(body: &str) -> Result<Vec<f32>, LlmError> {
    let parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body)))?;

    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| LlmError::parse_error("No embedding in response".to_string()))
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_overrides_defaults() {
        let client = OpenAiClient::new("key".to_string())
            .with_base_url("http://localhost:8080/v1")
            .with_model("gpt-4o")
            .with_embedding_model("custom-embed");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.model(), "gpt-4o");
        assert_eq!(client.embedding_model, "custom-embed");
    }

    #[test]
    fn context_becomes_system_message() {
        let context = json!({"task_name": "probe"});
        let messages = build_messages("do the thing", Some(&context));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("\"task_name\""));
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "do the thing");

        let bare = build_messages("solo", None);
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].role, "user");
    }

    #[test]
    fn parses_chat_response_body() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        })
        .to_string();
        assert_eq!(parse_chat_body(&body).unwrap(), "hello");
    }

    #[test]
    fn chat_body_without_choices_is_parse_error() {
        let body = json!({"choices": []}).to_string();
        let err = parse_chat_body(&body).unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ParseError);
    }

    #[test]
    fn parses_embedding_response_body() {
        let body = json!({
            "data": [{"embedding": [0.25, -0.5]}]
        })
        .to_string();
        assert_eq!(parse_embedding_body(&body).unwrap(), vec![0.25, -0.5]);
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = parse_chat_body("not json").unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ParseError);
    }
}
