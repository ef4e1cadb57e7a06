//! Completion provider implementations.
//!
//! - **[`DisabledProvider`]**: fails every request; used when no provider
//!   is configured, so browsing and syncing still work.
//! - **[`OpenAiProvider`]**: any OpenAI-compatible `POST /chat/completions`
//!   endpoint, with retry and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 5xx and network errors → retry with backoff 1s, 2s, 4s, ... (capped at 2^5)
//! - HTTP 429 → return [`CompletionError::RateLimited`] at once, carrying
//!   `Retry-After` when present, so the caller can surface it
//! - Other 4xx → fail immediately
//! - Client timeout → [`CompletionError::Timeout`] after retries

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use repolens_core::completion::{CompletionError, CompletionOptions, CompletionProvider};
use repolens_core::models::ChatMessage;

use crate::config::CompletionConfig;

/// Provider used when `completion.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> Result<String, CompletionError> {
        Err(CompletionError::Unavailable(
            "completion provider is disabled; set [completion] provider in the config".to_string(),
        ))
    }
}

/// OpenAI-compatible chat completions provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// Returns an error if `model` is unset or the API key variable is not
    /// in the environment.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = request_body(&self.model, messages, options);
        let mut last_err = CompletionError::Unavailable("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, error = %last_err, "retrying completion request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_err = CompletionError::Timeout;
                    continue;
                }
                Err(e) => {
                    last_err = CompletionError::Unavailable(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| CompletionError::Unavailable(format!("invalid response: {}", e)))?;
                return parse_chat_response(&json);
            }

            if status.as_u16() == 429 {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());
                return Err(CompletionError::RateLimited { retry_after_secs });
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                last_err = CompletionError::Unavailable(format!(
                    "completion API error {}: {}",
                    status, body_text
                ));
                continue;
            }
            return Err(CompletionError::Unavailable(format!(
                "completion API error {}: {}",
                status, body_text
            )));
        }

        Err(last_err)
    }
}

fn request_body(model: &str, messages: &[ChatMessage], options: CompletionOptions) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect::<Vec<_>>(),
        "temperature": options.temperature,
        "max_tokens": options.max_tokens,
    })
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CompletionError::Unavailable(
                "invalid completion response: missing choices[0].message.content".to_string(),
            )
        })
}

/// Build the provider named in the config.
pub fn create_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
