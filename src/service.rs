//! Construction of the chat pipeline from configuration.
//!
//! Every collaborator is built once here and handed to the pipeline as a
//! trait object; nothing is looked up globally at request time.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use corpus_chat_core::chat::{ChatPipeline, ChatSettings};
use corpus_chat_core::prompt::build_instructions;
use corpus_chat_core::retrieve::{create_retriever, RetrievalPolicy, Retriever};
use corpus_chat_core::store::CorpusStore;

use crate::config::{Config, StoreBackend};
use crate::db;
use crate::embedding::create_provider;
use crate::generation::AnthropicGenerator;
use crate::sqlite_store::SqliteStore;
use crate::supabase::SupabaseStore;

/// Open the configured corpus store.
pub async fn build_store(config: &Config) -> Result<Arc<dyn CorpusStore>> {
    let store: Arc<dyn CorpusStore> = match config.store.backend {
        StoreBackend::Supabase => {
            let supabase = config
                .store
                .supabase
                .as_ref()
                .context("missing [store.supabase] section")?;
            Arc::new(SupabaseStore::new(supabase)?)
        }
        StoreBackend::Sqlite => {
            let sqlite = config
                .store
                .sqlite
                .as_ref()
                .context("missing [store.sqlite] section")?;
            let pool = db::connect(&sqlite.path).await.with_context(|| {
                format!("Failed to open SQLite database: {}", sqlite.path.display())
            })?;
            Arc::new(SqliteStore::new(pool))
        }
    };
    info!(store = store.name(), "corpus store ready");
    Ok(store)
}

/// Build the retriever for the configured policy, or for `policy` if given.
///
/// The embedding provider is only constructed when the policy needs it.
pub fn build_retriever(
    config: &Config,
    store: Arc<dyn CorpusStore>,
    policy: Option<RetrievalPolicy>,
) -> Result<Arc<dyn Retriever>> {
    let mut settings = config.retrieval.settings(config.store.vector_dims);
    if let Some(policy) = policy {
        settings.policy = policy;
    }

    let embedder = if settings.policy == RetrievalPolicy::Vector {
        create_provider(&config.embedding)?
    } else {
        None
    };
    if let Some(embedder) = &embedder {
        info!(
            model = embedder.model_name(),
            dims = embedder.dims(),
            store_dims = config.store.vector_dims,
            "embedding provider ready"
        );
    }

    Ok(create_retriever(&settings, store, embedder)?)
}

/// Pipeline settings derived from the prompt, context, message and stats sections.
pub fn chat_settings(config: &Config) -> ChatSettings {
    ChatSettings {
        instructions: build_instructions(&config.prompt),
        context_style: config.context.style(),
        no_results_message: config.messages.no_results.clone(),
        record_usage: config.stats.enabled,
        ..ChatSettings::default()
    }
}

/// Build the full pipeline: store, retriever, and Claude generator.
pub async fn build_pipeline(config: &Config) -> Result<ChatPipeline> {
    let store = build_store(config).await?;
    let retriever = build_retriever(config, store.clone(), None)?;
    let generator = AnthropicGenerator::new(&config.generation, config.prompt.user_turn())?;

    Ok(ChatPipeline::new(
        retriever,
        Arc::new(generator),
        store,
        chat_settings(config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_chat_core::store::memory::InMemoryStore;

    fn config(extra: &str) -> Config {
        let toml = format!(
            "[store]\nbackend = \"sqlite\"\n\n[store.sqlite]\npath = \"/tmp/unused.sqlite\"\n\n{}",
            extra
        );
        toml::from_str(&toml).unwrap()
    }

    #[test]
    fn test_policy_override() {
        let cfg = config("[retrieval]\npolicy = \"keyword\"\n");
        let store: Arc<dyn CorpusStore> = Arc::new(InMemoryStore::new());
        let r = build_retriever(&cfg, store, Some(RetrievalPolicy::Bulk)).unwrap();
        assert_eq!(r.policy(), RetrievalPolicy::Bulk);
    }

    #[test]
    fn test_vector_without_provider_fails() {
        let cfg = config("[retrieval]\npolicy = \"keyword\"\n");
        let store: Arc<dyn CorpusStore> = Arc::new(InMemoryStore::new());
        assert!(build_retriever(&cfg, store, Some(RetrievalPolicy::Vector)).is_err());
    }

    #[test]
    fn test_chat_settings_follow_config() {
        let cfg = config("[stats]\nenabled = false\n\n[messages]\nno_results = \"Niente\"\n");
        let settings = chat_settings(&cfg);
        assert!(!settings.record_usage);
        assert_eq!(settings.no_results_message, "Niente");
        assert_eq!(settings.context_style.source_label, "Da");
        assert!(settings.instructions.contains("Péguy"));
    }
}
