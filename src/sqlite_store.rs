//! SQLite-backed [`CorpusStore`] implementation.
//!
//! Chunks live in `chunks` with their vector stored as a blob; titles come
//! from a join on `documents`. Similarity search is a brute-force cosine
//! scan, which is adequate for a single author's corpus.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use corpus_chat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use corpus_chat_core::models::{Chunk, Document, RetrievedChunk, UsageRecord};
use corpus_chat_core::store::CorpusStore;

const CHUNK_COLUMNS: &str = r#"
    SELECT c.text AS text, d.title AS title
    FROM chunks c
    LEFT JOIN documents d ON d.id = c.document_id
"#;

/// SQLite implementation of the [`CorpusStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a document.
    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace all chunks of `doc_id`, keeping the given order.
    pub async fn replace_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            let blob = chunk.embedding.as_deref().map(vec_to_blob);
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(doc_id)
            .bind(i as i64)
            .bind(&chunk.text)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Number of rows in `chat_stats`.
    pub async fn usage_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_stats")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn to_retrieved(row: &SqliteRow) -> RetrievedChunk {
    RetrievedChunk::new(row.get::<String, _>("text"), row.get::<Option<String>, _>("title"))
}

#[async_trait]
impl CorpusStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn match_chunks(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.text AS text, d.title AS title, c.embedding AS embedding
            FROM chunks c
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE c.embedding IS NOT NULL
            ORDER BY c.rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<RetrievedChunk> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                (similarity >= threshold).then(|| to_retrieved(row).with_similarity(similarity))
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);

        Ok(matches)
    }

    async fn find_containing(&self, term: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let needle = term.to_lowercase();

        // lower() in SQLite folds ASCII only, so it can prefilter ASCII terms.
        if needle.is_ascii() {
            let rows = sqlx::query(&format!(
                "{} WHERE instr(lower(c.text), ?) > 0 ORDER BY c.rowid LIMIT ?",
                CHUNK_COLUMNS
            ))
            .bind(&needle)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            return Ok(rows.iter().map(to_retrieved).collect());
        }

        let rows = sqlx::query(&format!("{} ORDER BY c.rowid", CHUNK_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter(|row| row.get::<String, _>("text").to_lowercase().contains(&needle))
            .take(limit)
            .map(to_retrieved)
            .collect())
    }

    async fn sample(&self, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(&format!("{} ORDER BY c.rowid LIMIT ?", CHUNK_COLUMNS))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(to_retrieved).collect())
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_stats (question, response_time_ms, chunks_used, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.question)
        .bind(record.response_time_ms as i64)
        .bind(record.chunks_used as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
