// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible chat-completions backend
//!
//! Both backend choices talk to a chat-completions endpoint; they differ only
//! in base URL, model and key.
//!
//! # Example
//!
//! ```no_run
//! use datachat::engine::llm::{LlmBackendConfig, LlmEngine};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = LlmBackendConfig::openai_default().with_api_key("sk-...");
//! let engine = LlmEngine::new(&config)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use super::{AnalysisEngine, AnalysisRequest, Answer};
use crate::types::Message;
use crate::utils::mask_sensitive;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BAMBOO_MODEL: &str = "gpt-4";

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Maximum attempts for transient errors.
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 10000;

const SYSTEM_PROMPT: &str = "You are a data analyst. Answer questions about the dataset below \
    using only its contents. Reply with the answer only, without code.";

/// Connection settings for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmBackendConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmBackendConfig {
    fn default() -> Self {
        Self::openai_default()
    }
}

impl LlmBackendConfig {
    pub fn openai_default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            api_key: None,
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn bamboo_default() -> Self {
        Self {
            model: DEFAULT_BAMBOO_MODEL.to_string(),
            ..Self::openai_default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn api_key_masked(&self) -> Option<String> {
        self.api_key.as_deref().map(|k| mask_sensitive(k, 4))
    }
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM backend not configured: {0}")]
    NotConfigured(String),
    #[error("LLM authentication failed")]
    AuthError,
    #[error("LLM rate limit exceeded")]
    RateLimited,
    #[error("LLM model not found: {0}")]
    ModelNotFound(String),
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("LLM network error: {0}")]
    NetworkError(String),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions client with retry and exponential backoff.
#[derive(Debug, Clone)]
pub struct LlmClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &LlmBackendConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for LLM backend")?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::NotConfigured("API key is not set".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = std::cmp::min(RETRY_BASE_DELAY_MS * (1 << attempt), RETRY_MAX_DELAY_MS);
                tracing::debug!(attempt = attempt + 1, delay_ms = delay, "Retrying LLM request");
                sleep(Duration::from_millis(delay)).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        LlmError::NetworkError("Request timed out".to_string())
                    } else {
                        LlmError::NetworkError(e.to_string())
                    });
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                match status.as_u16() {
                    401 | 403 => return Err(LlmError::AuthError),
                    404 => return Err(LlmError::ModelNotFound(self.model.clone())),
                    429 => {
                        last_error = Some(LlmError::RateLimited);
                        continue;
                    }
                    500..=599 => {
                        last_error =
                            Some(LlmError::ApiError(format!("HTTP {} - {}", status, error_text)));
                        continue;
                    }
                    _ => {
                        return Err(LlmError::ApiError(format!("HTTP {} - {}", status, error_text)))
                    }
                }
            }

            let parsed: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| LlmError::ApiError(format!("Failed to parse chat response: {}", e)))?;

            return Ok(parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default());
        }

        Err(last_error.unwrap_or_else(|| LlmError::ApiError("Max retries exceeded".to_string())))
    }
}

/// Answers dataset questions by describing the dataset to an LLM.
#[derive(Debug, Clone)]
pub struct LlmEngine {
    client: LlmClient,
}

impl LlmEngine {
    pub fn new(config: &LlmBackendConfig) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new(config)?,
        })
    }

    pub fn build_messages(request: &AnalysisRequest<'_>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message::system(format!(
            "{}\n\n{}",
            SYSTEM_PROMPT,
            request.dataset.describe()
        )));
        messages.extend(request.history.iter().cloned());
        messages.push(Message::user(request.query));
        messages
    }
}

#[async_trait]
impl AnalysisEngine for LlmEngine {
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<Answer> {
        let messages = Self::build_messages(&request);
        let text = self
            .client
            .chat(&messages)
            .await
            .with_context(|| format!("Chat completion with model {} failed", self.client.model()))?;
        Ok(Answer::Text(text.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use serde_json::json;

    #[test]
    fn test_messages_carry_schema_history_and_query() {
        let data = Dataset::new(
            "sales",
            vec!["country".into(), "sales".into()],
            vec![vec![json!("France"), json!(2900)]],
        );
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let request = AnalysisRequest {
            dataset: &data,
            query: "Total sales?",
            history: &history,
            streaming_mode: false,
        };
        let messages = LlmEngine::build_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("1 rows and 2 columns"));
        assert_eq!(messages[3], Message::user("Total sales?"));
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_fast() {
        let client = LlmClient::new(&LlmBackendConfig::openai_default()).unwrap();
        assert!(!client.is_configured());
        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }

    #[test]
    fn test_key_masked() {
        let config = LlmBackendConfig::bamboo_default().with_api_key("sk-1234567890abcdef");
        let masked = config.api_key_masked().unwrap();
        assert!(!masked.contains("567890"));
        assert_eq!(config.model, DEFAULT_BAMBOO_MODEL);
    }
}
