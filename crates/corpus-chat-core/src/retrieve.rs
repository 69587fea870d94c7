//! Retrieval policies: which chunks does a question get to see?
//!
//! Every policy implements the [`Retriever`] trait, and [`create_retriever`]
//! picks one from [`RetrievalSettings`]. All store access goes through
//! [`CorpusStore`].
//!
//! | Policy | Ranking | Store calls |
//! |--------|---------|-------------|
//! | [`KeywordRetriever`] | none | one substring query per keyword, then an unranked sample if nothing matched |
//! | [`BulkRetriever`] | none | one unranked sample |
//! | [`VectorRetriever`] | cosine similarity | embed, similarity search, unranked sample if the search errors |
//!
//! Results are deduplicated by chunk text and capped at
//! `RetrievalSettings::max_chunks` when set.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::{reconcile_dims, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::models::{RetrievalPath, RetrievalResult, RetrievedChunk};
use crate::store::CorpusStore;

/// Selectable retrieval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalPolicy {
    Keyword,
    Bulk,
    #[default]
    Vector,
}

impl fmt::Display for RetrievalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Keyword => "keyword",
            Self::Bulk => "bulk",
            Self::Vector => "vector",
        };
        f.write_str(name)
    }
}

impl FromStr for RetrievalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "bulk" => Ok(Self::Bulk),
            "vector" => Ok(Self::Vector),
            other => Err(format!(
                "Unknown retrieval policy: '{}'. Use keyword, bulk, or vector.",
                other
            )),
        }
    }
}

/// Tuning for [`KeywordRetriever`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSettings {
    /// Minimum keyword length in characters.
    pub min_keyword_len: usize,
    /// Keywords taken from the question, in order of appearance.
    pub max_keywords: usize,
    /// Row cap per keyword query.
    pub per_keyword_limit: usize,
    /// Sample size when no keyword matched anything.
    pub fallback_limit: usize,
}

impl Default for KeywordSettings {
    fn default() -> Self {
        Self {
            min_keyword_len: 4,
            max_keywords: 3,
            per_keyword_limit: 30,
            fallback_limit: 100,
        }
    }
}

/// Tuning for [`VectorRetriever`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSettings {
    /// Fixed vector width of the store.
    pub store_dims: usize,
    /// Minimum similarity for a chunk to count as relevant.
    pub match_threshold: f64,
    /// Maximum rows returned by the similarity search.
    pub match_count: usize,
    /// Sample size when the similarity search itself fails.
    pub error_fallback_limit: usize,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            store_dims: 1536,
            match_threshold: 0.5,
            match_count: 15,
            error_fallback_limit: 10,
        }
    }
}

/// Everything needed to build a [`Retriever`], decoupled from app config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub policy: RetrievalPolicy,
    pub keyword: KeywordSettings,
    /// Rows loaded by [`BulkRetriever`].
    pub bulk_limit: usize,
    pub vector: VectorSettings,
    /// Global cap on returned chunks.
    pub max_chunks: Option<usize>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            policy: RetrievalPolicy::default(),
            keyword: KeywordSettings::default(),
            bulk_limit: 500,
            vector: VectorSettings::default(),
            max_chunks: None,
        }
    }
}

/// Selects the chunks relevant to a question.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn policy(&self) -> RetrievalPolicy;

    /// Retrieve an ordered, deduplicated chunk list for `question`.
    ///
    /// An empty result is not an error: the caller answers with its
    /// "nothing found" message.
    async fn retrieve(&self, question: &str) -> Result<RetrievalResult, RetrievalError>;
}

/// Build the retriever named by `settings.policy`.
///
/// # Errors
///
/// [`RetrievalError::Disabled`] when the vector policy is selected without
/// an embedding provider.
pub fn create_retriever(
    settings: &RetrievalSettings,
    store: Arc<dyn CorpusStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Arc<dyn Retriever>, RetrievalError> {
    let retriever: Arc<dyn Retriever> = match settings.policy {
        RetrievalPolicy::Keyword => Arc::new(KeywordRetriever::new(
            store,
            settings.keyword.clone(),
            settings.max_chunks,
        )),
        RetrievalPolicy::Bulk => Arc::new(BulkRetriever::new(
            store,
            settings.bulk_limit,
            settings.max_chunks,
        )),
        RetrievalPolicy::Vector => {
            let embedder = embedder.ok_or_else(|| {
                RetrievalError::Disabled(
                    "vector retrieval requires an embedding provider".to_string(),
                )
            })?;
            Arc::new(VectorRetriever::new(
                store,
                embedder,
                settings.vector.clone(),
                settings.max_chunks,
            ))
        }
    };
    Ok(retriever)
}

/// Lowercase the question, split on whitespace, and keep the first
/// `max_keywords` tokens of at least `min_len` characters.
pub fn extract_keywords(question: &str, min_len: usize, max_keywords: usize) -> Vec<String> {
    question
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= min_len)
        .take(max_keywords)
        .map(str::to_string)
        .collect()
}

/// Deduplicate by exact text.
///
/// Each text keeps the position of its first occurrence and the value of
/// its last occurrence.
pub fn dedup_by_text(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<RetrievedChunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match positions.get(&chunk.text) {
            Some(&i) => out[i] = chunk,
            None => {
                positions.insert(chunk.text.clone(), out.len());
                out.push(chunk);
            }
        }
    }
    out
}

/// Deduplicate a ranked list by exact text, keeping the first occurrence.
///
/// On similarity-ordered input this keeps each text's best row, so the
/// order stays non-increasing.
pub fn dedup_ranked(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen: HashSet<String> = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.text.clone()))
        .collect()
}

fn cap(mut chunks: Vec<RetrievedChunk>, max_chunks: Option<usize>) -> Vec<RetrievedChunk> {
    if let Some(max) = max_chunks {
        chunks.truncate(max);
    }
    chunks
}

// ============ Keyword ============

/// Lexical retrieval: substring match per keyword, unioned.
pub struct KeywordRetriever {
    store: Arc<dyn CorpusStore>,
    settings: KeywordSettings,
    max_chunks: Option<usize>,
}

impl KeywordRetriever {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        settings: KeywordSettings,
        max_chunks: Option<usize>,
    ) -> Self {
        Self {
            store,
            settings,
            max_chunks,
        }
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn policy(&self) -> RetrievalPolicy {
        RetrievalPolicy::Keyword
    }

    async fn retrieve(&self, question: &str) -> Result<RetrievalResult, RetrievalError> {
        let keywords = extract_keywords(
            question,
            self.settings.min_keyword_len,
            self.settings.max_keywords,
        );
        debug!(?keywords, "keyword retrieval");

        // Per-keyword queries are independent; results are merged in keyword order.
        let lookups = keywords
            .iter()
            .map(|k| self.store.find_containing(k, self.settings.per_keyword_limit));
        let mut matched = Vec::new();
        for rows in join_all(lookups).await {
            matched.extend(rows.map_err(RetrievalError::storage)?);
        }
        let matched = dedup_by_text(matched);

        if !matched.is_empty() {
            info!(keywords = keywords.len(), chunks = matched.len(), "keyword matches");
            return Ok(RetrievalResult::primary(cap(matched, self.max_chunks)));
        }

        let sample = self
            .store
            .sample(self.settings.fallback_limit)
            .await
            .map_err(RetrievalError::storage)?;
        info!(chunks = sample.len(), "no keyword matched, using unranked sample");
        Ok(RetrievalResult {
            chunks: cap(dedup_by_text(sample), self.max_chunks),
            path: RetrievalPath::KeywordFallback,
        })
    }
}

// ============ Bulk ============

/// Hands a fixed-size prefix of the corpus to the model, unfiltered.
pub struct BulkRetriever {
    store: Arc<dyn CorpusStore>,
    limit: usize,
    max_chunks: Option<usize>,
}

impl BulkRetriever {
    pub fn new(store: Arc<dyn CorpusStore>, limit: usize, max_chunks: Option<usize>) -> Self {
        Self {
            store,
            limit,
            max_chunks,
        }
    }
}

#[async_trait]
impl Retriever for BulkRetriever {
    fn policy(&self) -> RetrievalPolicy {
        RetrievalPolicy::Bulk
    }

    async fn retrieve(&self, _question: &str) -> Result<RetrievalResult, RetrievalError> {
        let rows = self
            .store
            .sample(self.limit)
            .await
            .map_err(RetrievalError::storage)?;
        info!(chunks = rows.len(), limit = self.limit, "bulk context loaded");
        Ok(RetrievalResult::primary(cap(dedup_by_text(rows), self.max_chunks)))
    }
}

// ============ Vector ============

/// Similarity search over question embeddings.
pub struct VectorRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: VectorSettings,
    max_chunks: Option<usize>,
}

impl VectorRetriever {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: VectorSettings,
        max_chunks: Option<usize>,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
            max_chunks,
        }
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, RetrievalError> {
        let native = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| RetrievalError::Embedding {
                provider: self.embedder.model_name().to_string(),
                message: format!("{e:#}"),
            })?;
        if native.len() != self.settings.store_dims {
            debug!(
                native = native.len(),
                store = self.settings.store_dims,
                "reconciling embedding width"
            );
        }
        Ok(reconcile_dims(native, self.settings.store_dims))
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn policy(&self) -> RetrievalPolicy {
        RetrievalPolicy::Vector
    }

    async fn retrieve(&self, question: &str) -> Result<RetrievalResult, RetrievalError> {
        let query_vec = self.embed_question(question).await?;

        let searched = self
            .store
            .match_chunks(
                &query_vec,
                self.settings.match_threshold,
                self.settings.match_count,
            )
            .await;

        match searched {
            Ok(rows) => {
                let threshold = self.settings.match_threshold;
                let mut rows: Vec<RetrievedChunk> = rows
                    .into_iter()
                    .filter(|r| r.similarity.map_or(true, |s| s >= threshold))
                    .collect();
                // Stable: ties keep the store's order.
                rows.sort_by(|a, b| {
                    let (a, b) = (a.similarity.unwrap_or(0.0), b.similarity.unwrap_or(0.0));
                    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
                });
                info!(chunks = rows.len(), threshold, "similarity search");
                Ok(RetrievalResult::primary(cap(dedup_ranked(rows), self.max_chunks)))
            }
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    error = %format!("{e:#}"),
                    "similarity search failed, falling back to unranked sample"
                );
                let sample = self
                    .store
                    .sample(self.settings.error_fallback_limit)
                    .await
                    .map_err(RetrievalError::storage)?;
                Ok(RetrievalResult {
                    chunks: cap(dedup_by_text(sample), self.max_chunks),
                    path: RetrievalPath::SearchErrorFallback,
                })
            }
        }
    }
}
