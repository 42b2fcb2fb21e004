//! Completion Provider Adapter
//!
//! Wraps an OpenAI-compatible `/chat/completions` endpoint. One call in,
//! one trimmed text out, or a typed `ProviderError`. No retries happen here.

use crate::error::{ProviderError, Result, Text2SqlError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Message in OpenAI chat format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with a completion request.
///
/// Optional fields are left out of the request body entirely when `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl CompletionParams {
    /// Parameters for SQL generation.
    pub fn generation() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1000,
            top_p: Some(1.0),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
        }
    }

    /// Parameters for the short valid/invalid judgement.
    pub fn validation() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 100,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

/// A text-completion service. Implementations must be safe to share between
/// independent runs.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for log output (e.g., "groq", "stub")
    fn name(&self) -> &str;

    /// Complete the conversation and return the first choice's text, trimmed.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> std::result::Result<String, ProviderError>;
}

/// Check request preconditions before anything goes over the wire.
pub fn validate_messages(messages: &[ChatMessage]) -> std::result::Result<(), ProviderError> {
    if messages.is_empty() {
        return Err(ProviderError::InvalidRequest(
            "message list must not be empty".to_string(),
        ));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(format!(
                "message {} has empty content",
                i
            )));
        }
    }
    Ok(())
}

/// Run one provider call under a timeout, aborting early if `cancel` fires.
pub async fn guarded_complete(
    provider: &dyn CompletionProvider,
    messages: &[ChatMessage],
    params: &CompletionParams,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<String, ProviderError> {
    if cancel.is_cancelled() {
        return Err(ProviderError::Cancelled);
    }
    validate_messages(messages)?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = tokio::time::timeout(timeout, provider.complete(messages, params)) => {
            match result {
                Ok(inner) => inner,
                Err(_) => Err(ProviderError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    params: &'a CompletionParams,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Text2SqlError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> std::result::Result<String, ProviderError> {
        validate_messages(messages)?;

        let body = ChatRequest {
            model: &self.model,
            messages,
            params,
        };

        debug!(model = %self.model, messages = messages.len(), max_tokens = params.max_tokens, "Sending completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Transport(format!("LLM API call timed out: {}", e))
                } else {
                    ProviderError::Transport(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

/// Pull the first choice's text out of a chat-completions response body.
pub fn extract_content(
    response_json: &serde_json::Value,
) -> std::result::Result<String, ProviderError> {
    if let Some(error) = response_json.get("error") {
        return Err(ProviderError::Api {
            status: 200,
            body: error.to_string(),
        });
    }

    let first = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .ok_or_else(|| ProviderError::Malformed("No choices in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => return Err(ProviderError::ContentFiltered),
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    let content = first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::Malformed("No content in LLM response".to_string()))?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ProviderError::Malformed("Empty content in LLM response".to_string()));
    }

    Ok(content.to_string())
}
