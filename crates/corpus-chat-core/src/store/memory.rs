//! In-memory [`CorpusStore`] implementation for tests and small corpora.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine similarity over every chunk that carries a vector.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, RetrievedChunk, UsageRecord};

use super::CorpusStore;

/// In-memory corpus. Chunks keep their insertion order.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    usage: RwLock<Vec<UsageRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            usage: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_document(&self, doc: Document) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    pub fn insert_chunk(&self, chunk: Chunk) -> Result<()> {
        let mut chunks = self.chunks.write().map_err(|_| poisoned())?;
        chunks.push(chunk);
        Ok(())
    }

    /// Usage records written so far, oldest first.
    pub fn usage_records(&self) -> Result<Vec<UsageRecord>> {
        Ok(self.usage.read().map_err(|_| poisoned())?.clone())
    }

    fn read_chunks(&self) -> Result<RwLockReadGuard<'_, Vec<Chunk>>> {
        self.chunks.read().map_err(|_| poisoned())
    }

    fn to_retrieved(&self, chunk: &Chunk) -> Result<RetrievedChunk> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        let title = docs.get(&chunk.document_id).map(|d| d.title.clone());
        Ok(RetrievedChunk::new(chunk.text.clone(), title))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl CorpusStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn match_chunks(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let chunks = self.read_chunks()?;
        let mut scored: Vec<(&Chunk, f64)> = chunks
            .iter()
            .filter_map(|c| {
                let vector = c.embedding.as_ref()?;
                let sim = cosine_similarity(query_vec, vector) as f64;
                (sim >= threshold).then_some((c, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(c, sim)| self.to_retrieved(c).map(|r| r.with_similarity(sim)))
            .collect()
    }

    async fn find_containing(&self, term: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let needle = term.to_lowercase();
        let chunks = self.read_chunks()?;
        chunks
            .iter()
            .filter(|c| c.text.to_lowercase().contains(&needle))
            .take(limit)
            .map(|c| self.to_retrieved(c))
            .collect()
    }

    async fn sample(&self, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let chunks = self.read_chunks()?;
        chunks
            .iter()
            .take(limit)
            .map(|c| self.to_retrieved(c))
            .collect()
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let mut usage = self.usage.write().map_err(|_| poisoned())?;
        usage.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_document(Document {
                id: "d1".into(),
                title: "Le Porche du mystère".into(),
            })
            .unwrap();
        let rows = [
            ("c1", "La petite espérance", vec![1.0, 0.0]),
            ("c2", "Notre jeunesse", vec![0.8, 0.6]),
            ("c3", "Ève", vec![0.0, 1.0]),
        ];
        for (id, text, v) in rows {
            store
                .insert_chunk(Chunk {
                    id: id.into(),
                    document_id: "d1".into(),
                    text: text.into(),
                    embedding: Some(v),
                })
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_match_orders_and_thresholds() {
        let store = seeded();
        let hits = store.match_chunks(&[1.0, 0.0], 0.5, 10).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["La petite espérance", "Notre jeunesse"]);
        assert!(hits[0].similarity.unwrap() >= hits[1].similarity.unwrap());
        assert_eq!(hits[0].title.as_deref(), Some("Le Porche du mystère"));
    }

    #[tokio::test]
    async fn test_find_containing_ignores_case() {
        let store = seeded();
        let hits = store.find_containing("JEUNESSE", 30).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Notre jeunesse");
        assert!(hits[0].similarity.is_none());
    }

    #[tokio::test]
    async fn test_sample_respects_limit_and_order() {
        let store = seeded();
        let hits = store.sample(2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "La petite espérance");
    }

    #[tokio::test]
    async fn test_unknown_document_has_no_title() {
        let store = InMemoryStore::new();
        store
            .insert_chunk(Chunk {
                id: "x".into(),
                document_id: "missing".into(),
                text: "orphan".into(),
                embedding: None,
            })
            .unwrap();
        let hits = store.sample(10).await.unwrap();
        assert_eq!(hits[0].title, None);
    }
}
