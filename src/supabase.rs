//! Supabase (PostgREST) corpus store.
//!
//! Talks to the REST gateway of a Supabase project:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | similarity search | `POST /rest/v1/rpc/{match_function}` |
//! | substring search | `GET /rest/v1/{chunks_table}?chunk_text=ilike.*term*` |
//! | sample | `GET /rest/v1/{chunks_table}?limit=n` |
//! | usage | `POST /rest/v1/{stats_table}` |
//!
//! Chunk rows are read with the owning document embedded
//! (`{documents_table}!inner(title)`), so every row carries its title.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use corpus_chat_core::models::{RetrievedChunk, UsageRecord};
use corpus_chat_core::store::CorpusStore;

use crate::config::SupabaseConfig;
use crate::http::client_with_timeout;

pub struct SupabaseStore {
    rest_url: String,
    key: String,
    chunks_table: String,
    documents_table: String,
    match_function: String,
    stats_table: String,
    client: Client,
}

/// One row returned by the similarity search function.
#[derive(Debug, Deserialize)]
struct MatchRow {
    chunk_text: String,
    #[serde(default)]
    document_title: Option<String>,
    similarity: f64,
}

impl SupabaseStore {
    /// Connect using the key found in `config.key_env`.
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let key = std::env::var(&config.key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.key_env))?;
        Self::with_key(config, key)
    }

    pub fn with_key(config: &SupabaseConfig, key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            key: key.into(),
            chunks_table: config.chunks_table.clone(),
            documents_table: config.documents_table.clone(),
            match_function: config.match_function.clone(),
            stats_table: config.stats_table.clone(),
            client: client_with_timeout(config.timeout_secs)?,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn chunk_select(&self) -> String {
        format!("chunk_text,document_id,{}!inner(title)", self.documents_table)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Supabase {} request failed", what))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Supabase {} failed (HTTP {}): {}", what, status.as_u16(), body);
        }
        Ok(response)
    }

    async fn select_chunks(&self, filters: &[(&str, String)], limit: usize) -> Result<Vec<RetrievedChunk>> {
        let mut query = vec![("select", self.chunk_select())];
        query.extend(filters.iter().map(|(k, v)| (*k, v.clone())));
        query.push(("limit", limit.to_string()));

        let request = self
            .client
            .get(format!("{}/{}", self.rest_url, self.chunks_table))
            .query(&query);
        let rows: Value = self
            .send(request, "select")
            .await?
            .json()
            .await
            .context("Supabase select returned invalid JSON")?;

        parse_chunk_rows(&rows, &self.documents_table)
    }
}

#[async_trait]
impl CorpusStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn match_chunks(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let body = json!({
            "query_embedding": query_vec,
            "match_threshold": threshold,
            "match_count": limit,
        });
        let request = self
            .client
            .post(format!("{}/rpc/{}", self.rest_url, self.match_function))
            .json(&body);
        let rows: Vec<MatchRow> = self
            .send(request, "similarity search")
            .await?
            .json()
            .await
            .context("Supabase similarity search returned unexpected rows")?;

        Ok(rows
            .into_iter()
            .map(|r| RetrievedChunk::new(r.chunk_text, r.document_title).with_similarity(r.similarity))
            .collect())
    }

    async fn find_containing(&self, term: &str, limit: usize) -> Result<Vec<RetrievedChunk>> {
        let pattern = format!("ilike.*{}*", escape_like(term));
        self.select_chunks(&[("chunk_text", pattern)], limit).await
    }

    async fn sample(&self, limit: usize) -> Result<Vec<RetrievedChunk>> {
        self.select_chunks(&[], limit).await
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let body = json!({
            "question": record.question,
            "response_time_ms": record.response_time_ms,
            "chunks_used": record.chunks_used,
        });
        let request = self
            .client
            .post(format!("{}/{}", self.rest_url, self.stats_table))
            .header("Prefer", "return=minimal")
            .json(&body);
        self.send(request, "usage insert").await?;
        Ok(())
    }
}

/// Make `term` literal inside an `ilike` pattern.
///
/// `%` and `_` are LIKE wildcards and `*` is PostgREST's URL wildcard.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Convert PostgREST chunk rows with an embedded document into chunks.
fn parse_chunk_rows(rows: &Value, documents_table: &str) -> Result<Vec<RetrievedChunk>> {
    let rows = rows
        .as_array()
        .ok_or_else(|| anyhow!("Supabase select did not return an array"))?;

    rows.iter()
        .map(|row| {
            let text = row
                .get("chunk_text")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("Supabase row without chunk_text"))?;
            let title = row
                .get(documents_table)
                .and_then(|d| d.get("title"))
                .and_then(|t| t.as_str())
                .map(str::to_string);
            Ok(RetrievedChunk::new(text, title))
        })
        .collect()
}
