//! End-to-end tests of `POST /api/chat` against a real server.
//!
//! The pipeline is wired from scripted collaborators (store, embedder,
//! generator) so every scenario is deterministic and makes no network calls
//! beyond the local server.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use corpus_chat::config::{MessagesConfig, ServerConfig};
use corpus_chat::server::build_router;
use corpus_chat_core::chat::{ChatPipeline, ChatSettings};
use corpus_chat_core::embedding::EmbeddingProvider;
use corpus_chat_core::error::GenerationError;
use corpus_chat_core::generate::AnswerGenerator;
use corpus_chat_core::models::{RetrievedChunk, UsageRecord};
use corpus_chat_core::retrieve::{create_retriever, RetrievalSettings};
use corpus_chat_core::store::CorpusStore;

// ─── Scripted collaborators ─────────────────────────────────────────

/// Store whose similarity search either returns fixed rows or fails.
struct ScriptedStore {
    matches: Option<Vec<RetrievedChunk>>,
    sample_rows: Vec<RetrievedChunk>,
    last_query_len: Mutex<Option<usize>>,
    usage: Mutex<Vec<UsageRecord>>,
}

impl ScriptedStore {
    fn matching(rows: Vec<RetrievedChunk>) -> Self {
        Self {
            matches: Some(rows),
            sample_rows: Vec::new(),
            last_query_len: Mutex::new(None),
            usage: Mutex::new(Vec::new()),
        }
    }

    fn failing_search(sample_rows: Vec<RetrievedChunk>) -> Self {
        Self {
            matches: None,
            sample_rows,
            last_query_len: Mutex::new(None),
            usage: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CorpusStore for ScriptedStore {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn match_chunks(
        &self,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        *self.last_query_len.lock().unwrap() = Some(query_vec.len());
        match &self.matches {
            Some(rows) => Ok(rows
                .iter()
                .filter(|r| r.similarity.unwrap_or(0.0) >= threshold)
                .take(limit)
                .cloned()
                .collect()),
            None => bail!("connection reset by peer"),
        }
    }

    async fn find_containing(&self, _term: &str, _limit: usize) -> Result<Vec<RetrievedChunk>> {
        Ok(Vec::new())
    }

    async fn sample(&self, limit: usize) -> Result<Vec<RetrievedChunk>> {
        Ok(self.sample_rows.iter().take(limit).cloned().collect())
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        self.usage.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Embedder with a native width of 384, below the store's 1536.
#[derive(Default)]
struct NarrowEmbedder {
    calls: AtomicUsize,
    unavailable: bool,
}

#[async_trait]
impl EmbeddingProvider for NarrowEmbedder {
    fn model_name(&self) -> &str {
        "narrow"
    }
    fn dims(&self) -> usize {
        384
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            bail!("embedding service unreachable");
        }
        Ok(vec![0.1; 384])
    }
}

#[derive(Default, Clone, Copy)]
enum Reply {
    #[default]
    Answer,
    Reject,
    Stall,
}

#[derive(Default)]
struct EchoGenerator {
    reply: Reply,
    contexts: Mutex<Vec<String>>,
}

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn generate_answer(
        &self,
        context: &str,
        _question: &str,
        _instructions: &str,
    ) -> Result<String, GenerationError> {
        self.contexts.lock().unwrap().push(context.to_string());
        match self.reply {
            Reply::Answer => Ok("Charles Péguy fu poeta e saggista.".to_string()),
            Reply::Reject => Err(GenerationError::Api {
                status: 401,
                message: "invalid x-api-key sk-ant-leaked".to_string(),
            }),
            Reply::Stall => {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                Ok("troppo tardi".to_string())
            }
        }
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    port: u16,
    store: Arc<ScriptedStore>,
    embedder: Arc<NarrowEmbedder>,
    generator: Arc<EchoGenerator>,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start(store: ScriptedStore) -> Harness {
    start_with(store, NarrowEmbedder::default(), EchoGenerator::default(), 60).await
}

async fn start_with(
    store: ScriptedStore,
    embedder: NarrowEmbedder,
    generator: EchoGenerator,
    request_timeout_secs: u64,
) -> Harness {
    let store = Arc::new(store);
    let embedder = Arc::new(embedder);
    let generator = Arc::new(generator);

    let retriever = create_retriever(
        &RetrievalSettings::default(),
        store.clone(),
        Some(embedder.clone() as Arc<dyn EmbeddingProvider>),
    )
    .unwrap();
    let settings = ChatSettings {
        instructions: "Sei un esperto di Charles Péguy.".to_string(),
        ..ChatSettings::default()
    };
    let pipeline = Arc::new(ChatPipeline::new(
        retriever,
        generator.clone(),
        store.clone(),
        settings,
    ));

    let port = find_free_port();
    let server = ServerConfig {
        bind: format!("127.0.0.1:{}", port),
        request_timeout_secs,
        ..ServerConfig::default()
    };
    let app = build_router(pipeline, &server, &MessagesConfig::default());
    let listener = tokio::net::TcpListener::bind(&server.bind).await.unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_server(port).await;

    Harness {
        port,
        store,
        embedder,
        generator,
        handle,
    }
}

async fn ask(h: &Harness, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(h.url("/api/chat"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_relevant_chunks_returns_fixed_message() {
    let h = start(ScriptedStore::matching(vec![
        RetrievedChunk::new("poco pertinente", Some("Clio".into())).with_similarity(0.31),
    ]))
    .await;

    let (status, body) = ask(&h, json!({ "question": "Chi era Péguy?" })).await;

    assert_eq!(status, 200);
    assert_eq!(body["answer"], MessagesConfig::default().no_results);
    assert_eq!(body["sources"], json!([]));
    assert!(h.generator.contexts.lock().unwrap().is_empty());
    assert!(h.store.usage.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_ranked_chunks_keep_order_in_context_and_sources() {
    let long_text = "a".repeat(250);
    let h = start(ScriptedStore::matching(vec![
        RetrievedChunk::new(long_text.clone(), Some("Ève".into())).with_similarity(0.8123),
        RetrievedChunk::new("Notre jeunesse", Some("Notre jeunesse".into())).with_similarity(0.6431),
        RetrievedChunk::new("Le Porche", None).with_similarity(0.5189),
    ]))
    .await;

    let (status, body) = ask(&h, json!({ "question": "Chi era Péguy?" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Charles Péguy fu poeta e saggista.");

    let sources = body["sources"].as_array().unwrap();
    let sims: Vec<f64> = sources
        .iter()
        .map(|s| s["similarity"].as_f64().unwrap())
        .collect();
    assert_eq!(sims, vec![0.81, 0.64, 0.52]);
    assert_eq!(sources[0]["title"], "Ève");
    assert_eq!(
        sources[0]["text"].as_str().unwrap(),
        format!("{}...", "a".repeat(200))
    );

    let contexts = h.generator.contexts.lock().unwrap();
    let context = &contexts[0];
    let p1 = context.find("[1] From \"Ève\"").unwrap();
    let p2 = context.find("[2] From \"Notre jeunesse\"").unwrap();
    let p3 = context.find("[3] From \"Untitled work\"").unwrap();
    assert!(p1 < p2 && p2 < p3);

    // The 384-wide question vector reached the store at full width.
    assert_eq!(*h.store.last_query_len.lock().unwrap(), Some(1536));

    let usage = h.store.usage.lock().unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].chunks_used, 3);
}

#[tokio::test]
async fn test_search_failure_falls_back_to_sample() {
    let h = start(ScriptedStore::failing_search(vec![
        RetrievedChunk::new("Heureux ceux qui sont morts", Some("Ève".into())),
        RetrievedChunk::new("La mystique", Some("Notre jeunesse".into())),
    ]))
    .await;

    let (status, body) = ask(&h, json!({ "question": "Chi era Péguy?" })).await;

    assert_eq!(status, 200);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert!(sources[0].get("similarity").is_none());
    assert_eq!(h.generator.contexts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_question_is_bad_request_without_calls() {
    let h = start(ScriptedStore::matching(Vec::new())).await;

    let (status, body) = ask(&h, json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Domanda mancante" }));

    let (status, _) = ask(&h, json!({ "question": "   " })).await;
    assert_eq!(status, 400);

    let resp = reqwest::Client::new()
        .post(h.url("/api/chat"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    assert!(h.generator.contexts.lock().unwrap().is_empty());
    assert_eq!(*h.store.last_query_len.lock().unwrap(), None);
}

fn one_match() -> ScriptedStore {
    ScriptedStore::matching(vec![
        RetrievedChunk::new("La mystique", Some("Notre jeunesse".into())).with_similarity(0.9),
    ])
}

#[tokio::test]
async fn test_generation_failure_hides_remote_detail() {
    let generator = EchoGenerator {
        reply: Reply::Reject,
        ..EchoGenerator::default()
    };
    let h = start_with(one_match(), NarrowEmbedder::default(), generator, 60).await;

    let resp = reqwest::Client::new()
        .post(h.url("/api/chat"))
        .json(&json!({ "question": "Chi era Péguy?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let raw = resp.text().await.unwrap();
    assert!(!raw.contains("x-api-key"));
    assert!(!raw.contains("sk-ant-leaked"));

    let body: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        body,
        json!({ "error": MessagesConfig::default().generation_error })
    );
    assert!(h.store.usage.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_embedding_failure_is_search_error() {
    let embedder = NarrowEmbedder {
        unavailable: true,
        ..NarrowEmbedder::default()
    };
    let h = start_with(one_match(), embedder, EchoGenerator::default(), 60).await;

    let (status, body) = ask(&h, json!({ "question": "Chi era Péguy?" })).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({ "error": MessagesConfig::default().search_error }));
    assert!(!body.to_string().contains("unreachable"));
    assert!(h.generator.contexts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_pipeline_times_out() {
    let generator = EchoGenerator {
        reply: Reply::Stall,
        ..EchoGenerator::default()
    };
    let h = start_with(one_match(), NarrowEmbedder::default(), generator, 1).await;

    let (status, body) = ask(&h, json!({ "question": "Chi era Péguy?" })).await;
    assert_eq!(status, 504);
    assert_eq!(body, json!({ "error": MessagesConfig::default().timeout }));
}

#[tokio::test]
async fn test_options_and_other_methods() {
    let h = start(ScriptedStore::matching(Vec::new())).await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, h.url("/api/chat"))
        .header("Origin", "https://example.org")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status().as_u16(), 200);
    assert!(preflight
        .headers()
        .contains_key("access-control-allow-origin"));

    let plain = client
        .request(reqwest::Method::OPTIONS, h.url("/api/chat"))
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status().as_u16(), 200);

    let get = client.get(h.url("/api/chat")).send().await.unwrap();
    assert_eq!(get.status().as_u16(), 405);
    let body: Value = get.json().await.unwrap();
    assert_eq!(body["error"], "Metodo non consentito");
}

#[tokio::test]
async fn test_health_reports_version() {
    let h = start(ScriptedStore::matching(Vec::new())).await;
    let body: Value = reqwest::get(h.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
