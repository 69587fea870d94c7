//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` on the OpenAI API (or any
//!   compatible endpoint), with retry and backoff.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: in-process inference via fastembed (feature
//!   `local-embeddings`); the model is loaded once on first use.
//!
//! Providers report their native width. Reconciling it with the store's
//! fixed vector width is the retriever's job, not theirs.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the configured provider:
//!
//! ```rust,no_run
//! # use corpus_chat::config::EmbeddingConfig;
//! # use corpus_chat::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert!(provider.is_none());
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use corpus_chat_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::http::{client_with_timeout, post_json_with_retry};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Reads its key from the environment variable named by
/// `embedding.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if the
    /// API key variable is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        Ok(Self {
            model,
            dims,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: client_with_timeout(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let auth = format!("Bearer {}", self.api_key);
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.base_url),
            &[("Authorization", auth.as_str())],
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(|e| anyhow!("OpenAI embedding failed: {}", e))?;

        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;

    to_f32_vec(embedding)
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). The model must already be pulled.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: client_with_timeout(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            &[],
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(|e| anyhow!("Ollama embedding failed (is Ollama running at {}?): {}", self.url, e))?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings[0]"))?;

    to_f32_vec(embedding)
}

fn to_f32_vec(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid embedding component: {}", v))
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding provider backed by fastembed.
///
/// The model is downloaded and loaded on the first [`embed`](EmbeddingProvider::embed)
/// call and reused afterwards; concurrent first calls wait for the same load.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: tokio::sync::OnceCell<Arc<std::sync::Mutex<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail fast on unknown names instead of at the first question.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            model: tokio::sync::OnceCell::new(),
        })
    }

    async fn loaded(&self) -> Result<Arc<std::sync::Mutex<fastembed::TextEmbedding>>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let which = config_to_fastembed_model(&self.model_name)?;
                tracing::info!(model = %self.model_name, "loading local embedding model");
                let loaded = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(which))
                        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await??;
                Ok::<_, anyhow::Error>(Arc::new(std::sync::Mutex::new(loaded)))
            })
            .await?;
        Ok(model.clone())
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.loaded().await?;
        let text = local_query_text(&self.model_name, text);
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            let mut out = model
                .embed(vec![text], None)
                .map_err(|e| anyhow!("Local embedding failed: {}", e))?;
            out.pop()
                .ok_or_else(|| anyhow!("Local embedding returned no vector"))
        })
        .await?
    }
}

/// Model name and native width for the local provider.
///
/// Defaults to a multilingual model, since the corpus is not English.
#[cfg_attr(not(feature = "local-embeddings"), allow(dead_code))]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "multilingual-e5-small".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

/// Input text for a question embedded by a local model.
///
/// The E5 family is trained with `query: ` and `passage: ` prefixes; a
/// question without its prefix scores low against passage vectors.
#[cfg_attr(not(feature = "local-embeddings"), allow(dead_code))]
fn local_query_text(model_name: &str, text: &str) -> String {
    if model_name.starts_with("multilingual-e5") {
        format!("query: {}", text)
    } else {
        text.to_string()
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Create the configured [`EmbeddingProvider`], or `None` when disabled.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | none |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_response() {
        let json = json!({
            "object": "list",
            "data": [{ "object": "embedding", "index": 0, "embedding": [0.5, -0.25, 1.0] }],
            "model": "text-embedding-3-small"
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let json = json!({ "error": { "message": "bad key" } });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({ "model": "nomic-embed-text", "embeddings": [[0.1, 0.2]] });
        let v = parse_ollama_response(&json).unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_non_numeric_component_is_error() {
        let json = json!({ "embeddings": [[0.1, "x"]] });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_disabled_provider_is_none() {
        assert!(create_provider(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_local_model_defaults() {
        let (name, dims) = resolve_local_model(&EmbeddingConfig::default());
        assert_eq!(name, "multilingual-e5-small");
        assert_eq!(dims, 384);
    }

    #[test]
    fn test_e5_questions_get_query_prefix() {
        assert_eq!(
            local_query_text("multilingual-e5-small", "Chi era Péguy?"),
            "query: Chi era Péguy?"
        );
        assert_eq!(local_query_text("bge-small-en-v1.5", "hope"), "hope");
    }

    #[test]
    fn test_ollama_default_url() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.url, "http://localhost:11434");
        assert_eq!(provider.dims(), 768);
    }
}
