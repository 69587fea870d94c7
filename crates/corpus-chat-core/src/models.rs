//! Core data models shared by the retrieval and answer pipeline.
//!
//! Documents and chunks are written by an external ingestion process and
//! are read-only here. Everything else lives for a single request.

use serde::{Deserialize, Serialize};

/// A source work of the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
}

/// A stored passage of a document.
///
/// `embedding`, when present, has the store's fixed width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A chunk as returned by a store query, joined with its document title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Text of the passage.
    pub text: String,
    /// Title of the owning document, if the store could resolve it.
    pub title: Option<String>,
    /// Similarity to the query; only set by vector search.
    pub similarity: Option<f64>,
}

impl RetrievedChunk {
    pub fn new(text: impl Into<String>, title: Option<String>) -> Self {
        Self {
            text: text.into(),
            title,
            similarity: None,
        }
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }
}

/// How a [`RetrievalResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    /// The policy's primary query answered.
    Primary,
    /// No keyword matched; an unranked sample was used instead.
    KeywordFallback,
    /// Similarity search failed; an unranked sample was used instead.
    SearchErrorFallback,
}

/// Ordered chunks selected for one question.
///
/// Deduplicated by chunk text and capped by the retriever that built it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    pub path: RetrievalPath,
}

impl RetrievalResult {
    pub fn primary(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            path: RetrievalPath::Primary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when a fallback sample stands in for ranked results.
    pub fn is_degraded(&self) -> bool {
        self.path == RetrievalPath::SearchErrorFallback
    }
}

/// Append-only usage statistics for one answered question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub question: String,
    pub response_time_ms: u64,
    pub chunks_used: usize,
}
