//! Chat-completion client for the hosted LLM service.
//!
//! Agents talk to the model through the [`ChatModel`] trait so the
//! orchestrator can be driven by a stub in tests. [`LlmClient`] is the
//! production implementation against an OpenAI-compatible
//! `/chat/completions` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM service unavailable: {0}")]
    Unavailable(String),

    #[error("LLM service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Anything that can answer a chat-completion request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation and return the assistant's reply text.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Client for an OpenAI-compatible chat-completion service.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Error body returned by the LLM service.
#[derive(Debug, Deserialize)]
struct LlmErrorResponse {
    error: LlmErrorBody,
}

#[derive(Debug, Deserialize)]
struct LlmErrorBody {
    message: String,
}

impl LlmClient {
    /// Create a new LLM client.
    pub fn new(base_url: &str, api_key: &str, timeout_seconds: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, max_retries, "LLM client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_retries,
        })
    }

    /// Check LLM service reachability.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);

        self.client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("LLM service health check failed")?
            .error_for_status()
            .context("LLM service unhealthy")?;

        Ok(())
    }

    async fn send_once(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(url = %url, model, messages = messages.len(), "LLM request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest { model, messages })
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let message = response
                .json::<LlmErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| format!("LLM service error: {}", status));

            if status == StatusCode::UNAUTHORIZED {
                tracing::error!("LLM service authentication failed");
            }

            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..ExponentialBackoff::default()
        };

        let mut attempts = 0u32;
        backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            async move {
                self.send_once(model, messages).await.map_err(|e| {
                    if e.is_transient() && attempt <= self.max_retries {
                        warn!(error = %e, attempt, "Transient LLM failure, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}
