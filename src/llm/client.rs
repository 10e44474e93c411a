// Claude API client for chat completions.
//
// Sends the tutoring context and conversation history to the Anthropic
// Messages API as a single non-streaming request and returns the assistant's
// reply text. The orchestrator talks to the `LanguageModel` trait so tests
// can substitute a scripted model.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::session::Turn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by a model call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request never produced a usable HTTP response, or the API rejected it.
    #[error("Model request failed: {0}")]
    CallFailed(String),
    /// The API answered 200 but the body did not contain reply text.
    #[error("Model returned unusable output: {0}")]
    MalformedOutput(String),
}

// ---------------------------------------------------------------------------
// LanguageModel trait
// ---------------------------------------------------------------------------

/// Interface to a conversational language model.
///
/// `history` is the ordered transcript window to send, oldest first. The
/// implementation maps each turn's role and content onto the wire format.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ModelError>;
}

// ---------------------------------------------------------------------------
// ClaudeClient
// ---------------------------------------------------------------------------

/// Low-level Claude API completion client.
pub struct ClaudeClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl ClaudeClient {
    /// Create a new client with the given API key, model identifier and
    /// per-request timeout.
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key,
            model,
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl LanguageModel for ClaudeClient {
    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::CallFailed("API key not configured".to_string()));
        }

        let messages: Vec<Value> = history
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": messages,
        });

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::CallFailed(format!("Network error: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::CallFailed(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            let message = parse_error_message(&text)
                .unwrap_or_else(|| format!("API returned status {status}"));
            warn!(%status, "model request rejected");
            return Err(ModelError::CallFailed(message));
        }

        match parse_usage(&text) {
            Some((input_tokens, output_tokens)) => {
                debug!(input_tokens, output_tokens, "completion received");
            }
            None => warn!("failed to parse usage from completion response"),
        }

        parse_completion_text(&text).ok_or_else(|| {
            ModelError::MalformedOutput("response contained no text content".to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that can be either an active Claude client or disabled.
pub enum LlmClient {
    /// Claude API is configured and ready.
    Active(ClaudeClient),
    /// Model functionality is disabled (no API key configured).
    Disabled,
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if an API key is present in credentials, otherwise
    /// returns `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.anthropic_api_key {
            Some(key) if !key.is_empty() => LlmClient::Active(ClaudeClient::new(
                key.clone(),
                config.model.name.clone(),
                config.model.request_timeout_secs,
            )),
            _ => LlmClient::Disabled,
        }
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, ModelError> {
        match self {
            LlmClient::Active(client) => {
                client.complete(system, history, max_tokens, temperature).await
            }
            LlmClient::Disabled => Err(ModelError::CallFailed(
                "Language model not configured".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Response JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract the concatenated text blocks from a Messages API response body.
///
/// Expected shape: `{ "content": [{ "type": "text", "text": "..." }, ...] }`
pub(crate) fn parse_completion_text(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let blocks = v.get("content")?.as_array()?;

    let mut text = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            text.push_str(block.get("text")?.as_str()?);
        }
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract `input_tokens` and `output_tokens` from a response body.
///
/// Expected shape: `{ "usage": { "input_tokens": N, "output_tokens": N } }`
pub(crate) fn parse_usage(body: &str) -> Option<(u32, u32)> {
    let v: Value = serde_json::from_str(body).ok()?;
    let usage = v.get("usage")?;
    let input = usage.get("input_tokens")?.as_u64()? as u32;
    let output = usage.get("output_tokens")?.as_u64()? as u32;
    Some((input, output))
}

/// Extract a human-readable message from an API error body.
///
/// Expected shape: `{ "error": { "type": "...", "message": "..." } }`
pub(crate) fn parse_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
