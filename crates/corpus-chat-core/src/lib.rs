//! # Corpus Chat Core
//!
//! Runtime-free logic for Corpus Chat: corpus data models, the store
//! abstraction, retrieval policies, context assembly, prompt building, and
//! the chat pipeline that ties them to an answer generator.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Concrete stores, embedding providers, and the answer generator live in
//! the `corpus-chat` application crate and plug in through the traits
//! defined here.
//!
//! ```text
//! question ─▶ Retriever ─▶ RetrievalResult ─▶ assemble ─▶ prompt ─▶ AnswerGenerator
//!               │  ▲
//!               ▼  │
//!        EmbeddingProvider / CorpusStore
//! ```

pub mod chat;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod store;

pub use chat::{ChatPipeline, ChatResponse, Source};
pub use error::{ChatError, GenerationError, RetrievalError};
pub use models::{RetrievalResult, RetrievedChunk};
