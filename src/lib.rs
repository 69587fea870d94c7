//! # corpus-chat
//!
//! A retrieval-grounded chatbot backend: questions about one author's works
//! are answered by Claude from passages retrieved out of the corpus, and the
//! answer comes back with its sources.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │  HTTP /  │──▶│ Retriever  │──▶│  Context  │──▶│  Claude  │
//! │   CLI    │   │ kw/bulk/vec│   │ Assembler │   │ Messages │
//! └──────────┘   └─────┬──────┘   └───────────┘   └──────────┘
//!                      │
//!             ┌────────┴────────┐
//!             ▼                 ▼
//!       ┌──────────┐      ┌──────────┐
//!       │ Supabase │      │  SQLite  │
//!       └──────────┘      └──────────┘
//! ```
//!
//! The runtime-independent pieces (retrieval policies, context assembly,
//! prompt building, the pipeline itself) live in `corpus-chat-core`; this
//! crate supplies the concrete stores, providers, server, and CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`http`] | JSON POST with retry and backoff |
//! | [`embedding`] | OpenAI, Ollama, and local embedding providers |
//! | [`generation`] | Anthropic Messages answer generator |
//! | [`supabase`] | Supabase (PostgREST) corpus store |
//! | [`sqlite_store`] | SQLite corpus store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`service`] | Pipeline construction from configuration |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod migrate;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod supabase;
