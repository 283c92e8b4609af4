use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::AiConfig;
use crate::resilience::{CircuitOpenError, TimeoutError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("AI API key not configured (set TACKLE_AI__API_KEY or ANTHROPIC_API_KEY)")]
    MissingApiKey,
    #[error("AI request failed: {0}")]
    Http(String),
    #[error("AI API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("AI response could not be parsed: {0}")]
    Parse(String),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl AiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, AiError::MissingApiKey | AiError::Api { status: 401 | 403, .. })
    }
}

/// Text completion used by the review pipeline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError>;
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http_client: ReqwestClient,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(AiError::MissingApiKey)?;
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AiError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AiError> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        debug!(chars = text.len(), "Received AI completion");

        if text.trim().is_empty() {
            return Err(AiError::Parse("response contained no text".to_string()));
        }
        Ok(text)
    }
}

/// Stand-in used when no API key is configured; every review fails with
/// [`AiError::MissingApiKey`] while the rest of the tool keeps working.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredClient;

#[async_trait]
impl InferenceClient for UnconfiguredClient {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AiError> {
        Err(AiError::MissingApiKey)
    }
}
