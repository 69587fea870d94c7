//! TOML configuration parsing and validation.
//!
//! Secrets never live in the file: each section that talks to a hosted
//! service names the environment variable holding its key.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [store]
//! backend = "supabase"
//!
//! [store.supabase]
//! url = "https://project.supabase.co"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! policy = "vector"
//! match_threshold = 0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use corpus_chat_core::context::{ContextStyle, Separator};
use corpus_chat_core::prompt::PromptConfig;
use corpus_chat_core::retrieve::{
    KeywordSettings, RetrievalPolicy, RetrievalSettings, VectorSettings,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

// ============ [server] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory served for every non-API path (the chat front-end).
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_request_timeout() -> u64 {
    60
}

// ============ [store] ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Supabase,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Fixed width of stored chunk vectors.
    #[serde(default = "default_vector_dims")]
    pub vector_dims: usize,
    #[serde(default)]
    pub supabase: Option<SupabaseConfig>,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

fn default_vector_dims() -> usize {
    1536
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(default = "default_supabase_key_env")]
    pub key_env: String,
    #[serde(default = "default_chunks_table")]
    pub chunks_table: String,
    #[serde(default = "default_documents_table")]
    pub documents_table: String,
    #[serde(default = "default_match_function")]
    pub match_function: String,
    #[serde(default = "default_stats_table")]
    pub stats_table: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_supabase_key_env() -> String {
    "SUPABASE_KEY".to_string()
}
fn default_chunks_table() -> String {
    "peguy_chunks".to_string()
}
fn default_documents_table() -> String {
    "peguy_documents".to_string()
}
fn default_match_function() -> String {
    "search_peguy_chunks".to_string()
}
fn default_stats_table() -> String {
    "chat_stats".to_string()
}
fn default_store_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

// ============ [embedding] ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Native width of the provider's vectors.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama instance).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embedding_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ [retrieval] ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub policy: RetrievalPolicy,
    #[serde(default = "default_min_keyword_len")]
    pub min_keyword_len: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_per_keyword_limit")]
    pub per_keyword_limit: usize,
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: usize,
    #[serde(default = "default_bulk_limit")]
    pub bulk_limit: usize,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default = "default_error_fallback_limit")]
    pub error_fallback_limit: usize,
    #[serde(default)]
    pub max_chunks: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            policy: RetrievalPolicy::default(),
            min_keyword_len: default_min_keyword_len(),
            max_keywords: default_max_keywords(),
            per_keyword_limit: default_per_keyword_limit(),
            fallback_limit: default_fallback_limit(),
            bulk_limit: default_bulk_limit(),
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            error_fallback_limit: default_error_fallback_limit(),
            max_chunks: None,
        }
    }
}

impl RetrievalConfig {
    /// Core retrieval settings for a store of width `vector_dims`.
    pub fn settings(&self, vector_dims: usize) -> RetrievalSettings {
        RetrievalSettings {
            policy: self.policy,
            keyword: KeywordSettings {
                min_keyword_len: self.min_keyword_len,
                max_keywords: self.max_keywords,
                per_keyword_limit: self.per_keyword_limit,
                fallback_limit: self.fallback_limit,
            },
            bulk_limit: self.bulk_limit,
            vector: VectorSettings {
                store_dims: vector_dims,
                match_threshold: self.match_threshold,
                match_count: self.match_count,
                error_fallback_limit: self.error_fallback_limit,
            },
            max_chunks: self.max_chunks,
        }
    }
}

fn default_min_keyword_len() -> usize {
    4
}
fn default_max_keywords() -> usize {
    3
}
fn default_per_keyword_limit() -> usize {
    30
}
fn default_fallback_limit() -> usize {
    100
}
fn default_bulk_limit() -> usize {
    500
}
fn default_match_threshold() -> f64 {
    0.5
}
fn default_match_count() -> usize {
    15
}
fn default_error_fallback_limit() -> usize {
    10
}

// ============ [generation] ============

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_url")]
    pub api_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_claude_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            api_url: default_generation_url(),
            api_version: default_api_version(),
            api_key_env: default_claude_key_env(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}
fn default_api_version() -> String {
    "2023-06-01".to_string()
}
fn default_claude_key_env() -> String {
    "CLAUDE_API_KEY".to_string()
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

// ============ [context] ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub source_label: String,
    pub untitled_label: String,
    pub separator: Separator,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            source_label: "Da".to_string(),
            untitled_label: "Opera sconosciuta".to_string(),
            separator: Separator::Rule,
        }
    }
}

impl ContextConfig {
    pub fn style(&self) -> ContextStyle {
        ContextStyle {
            source_label: self.source_label.clone(),
            untitled_label: self.untitled_label.clone(),
            separator: self.separator,
        }
    }
}

// ============ [messages] ============

/// Fixed user-facing texts. Diagnostics go to the log, never here.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MessagesConfig {
    pub no_results: String,
    pub missing_question: String,
    pub search_error: String,
    pub generation_error: String,
    pub server_error: String,
    pub timeout: String,
    pub method_not_allowed: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            no_results: "Non ho trovato informazioni rilevanti su questo argomento nei testi di Péguy. Prova a riformulare la domanda.".to_string(),
            missing_question: "Domanda mancante".to_string(),
            search_error: "Errore nella ricerca".to_string(),
            generation_error: "Errore nel generare la risposta".to_string(),
            server_error: "Errore del server".to_string(),
            timeout: "Tempo di risposta scaduto".to_string(),
            method_not_allowed: "Metodo non consentito".to_string(),
        }
    }
}

// ============ [stats] ============

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_stats_enabled(),
        }
    }
}

fn default_stats_enabled() -> bool {
    true
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate store
    match config.store.backend {
        StoreBackend::Supabase if config.store.supabase.is_none() => {
            bail!("store.backend = \"supabase\" requires a [store.supabase] section")
        }
        StoreBackend::Sqlite if config.store.sqlite.is_none() => {
            bail!("store.backend = \"sqlite\" requires a [store.sqlite] section")
        }
        _ => {}
    }
    if config.store.vector_dims == 0 {
        bail!("store.vector_dims must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate retrieval
    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.match_threshold) {
        bail!("retrieval.match_threshold must be in [0.0, 1.0]");
    }
    if r.max_keywords == 0
        || r.per_keyword_limit == 0
        || r.fallback_limit == 0
        || r.bulk_limit == 0
        || r.match_count == 0
        || r.error_fallback_limit == 0
    {
        bail!("retrieval limits must be >= 1");
    }
    if r.max_chunks == Some(0) {
        bail!("retrieval.max_chunks must be >= 1 when set");
    }
    if r.policy == RetrievalPolicy::Vector && !config.embedding.is_enabled() {
        bail!("retrieval.policy = \"vector\" requires an [embedding] provider");
    }

    // Validate generation
    if config.generation.max_tokens == 0 {
        bail!("generation.max_tokens must be > 0");
    }
    if config.server.request_timeout_secs == 0 {
        bail!("server.request_timeout_secs must be > 0");
    }

    Ok(())
}
