//! Storage abstraction for the corpus.
//!
//! The [`CorpusStore`] trait defines every storage operation the retrieval
//! policies need, so backends (Supabase over HTTP, SQLite, in-memory) are
//! interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{RetrievedChunk, UsageRecord};

/// Read-mostly access to the chunk corpus.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`match_chunks`](CorpusStore::match_chunks) | Similarity search, thresholded, best first |
/// | [`find_containing`](CorpusStore::find_containing) | Case-insensitive substring match, unranked |
/// | [`sample`](CorpusStore::sample) | Unfiltered, unranked prefix of the corpus |
/// | [`record_usage`](CorpusStore::record_usage) | Append one usage statistics row |
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Short backend name for logs (e.g. `"supabase"`).
    fn name(&self) -> &str;

    /// Return chunks whose similarity to `query_vec` is at least
    /// `threshold`, ordered by descending similarity, at most `limit`.
    ///
    /// `query_vec` already has the store's fixed width.
    async fn match_chunks(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Return up to `limit` chunks whose text contains `term`, ignoring case.
    async fn find_containing(&self, term: &str, limit: usize) -> Result<Vec<RetrievedChunk>>;

    /// Return up to `limit` chunks with no filtering or ranking.
    async fn sample(&self, limit: usize) -> Result<Vec<RetrievedChunk>>;

    /// Append a usage record. Records are never read back.
    async fn record_usage(&self, record: &UsageRecord) -> Result<()>;
}
