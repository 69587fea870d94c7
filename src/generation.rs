//! Answer generation via the Anthropic Messages API.
//!
//! One request per question: the system instructions go in `system`, and a
//! single user message carries the numbered context followed by the
//! question. The reply's text blocks are concatenated into the answer.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use corpus_chat_core::error::GenerationError;
use corpus_chat_core::generate::AnswerGenerator;
use corpus_chat_core::prompt::UserTurn;

use crate::config::GenerationConfig;
use crate::http::{client_with_timeout, post_json_with_retry, HttpFailure};

/// [`AnswerGenerator`] backed by Claude.
pub struct AnthropicGenerator {
    model: String,
    max_tokens: u32,
    api_url: String,
    api_version: String,
    api_key: String,
    max_retries: u32,
    user_turn: UserTurn,
    client: Client,
}

impl AnthropicGenerator {
    /// Build a generator, reading the API key from `config.api_key_env`.
    pub fn new(config: &GenerationConfig, user_turn: UserTurn) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GenerationError::Config(format!("{} environment variable not set", config.api_key_env))
        })?;
        Self::with_key(config, user_turn, api_key)
    }

    /// Build a generator with an explicit key.
    pub fn with_key(
        config: &GenerationConfig,
        user_turn: UserTurn,
        api_key: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let client = client_with_timeout(config.timeout_secs)
            .map_err(|e| GenerationError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_url: config.api_url.clone(),
            api_version: config.api_version.clone(),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            user_turn,
            client,
        })
    }

    fn request_body(&self, context: &str, question: &str, instructions: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": instructions,
            "messages": [{
                "role": "user",
                "content": self.user_turn.render(context, question),
            }],
        })
    }
}

#[async_trait]
impl AnswerGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_answer(
        &self,
        context: &str,
        question: &str,
        instructions: &str,
    ) -> Result<String, GenerationError> {
        let body = self.request_body(context, question, instructions);
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", self.api_version.as_str()),
        ];

        let json = post_json_with_retry(
            &self.client,
            &self.api_url,
            &headers,
            &body,
            self.max_retries,
            "Anthropic",
        )
        .await
        .map_err(|failure| match failure {
            HttpFailure::Status { status, body } => GenerationError::Api {
                status,
                message: api_error_message(&body),
            },
            HttpFailure::Transport(msg) => GenerationError::Transport(msg),
        })?;

        parse_anthropic_response(&json)
    }
}

/// Pull `error.message` out of an error body, or fall back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Concatenate the text blocks of a Messages API response.
fn parse_anthropic_response(json: &Value) -> Result<String, GenerationError> {
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(GenerationError::Api {
            status: 200,
            message,
        });
    }

    let text: String = json
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}
