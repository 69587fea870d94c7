//! The chat pipeline: question in, grounded answer with sources out.
//!
//! 1. Validate the question.
//! 2. Retrieve chunks with the configured [`Retriever`].
//! 3. No chunks: answer with the fixed "nothing found" message, no model call.
//! 4. Assemble the context and call the [`AnswerGenerator`].
//! 5. Record usage statistics (best effort).
//!
//! Each stage waits for the previous one; there is no shared mutable state
//! between requests, so one pipeline serves all of them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{assemble, ContextStyle};
use crate::error::ChatError;
use crate::generate::AnswerGenerator;
use crate::models::{RetrievedChunk, UsageRecord};
use crate::retrieve::Retriever;
use crate::store::CorpusStore;

/// Pipeline settings that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// System prompt handed to the generator.
    pub instructions: String,
    pub context_style: ContextStyle,
    /// Answer returned when retrieval finds nothing.
    pub no_results_message: String,
    /// Characters of chunk text echoed back per source.
    pub excerpt_chars: usize,
    /// Write a [`UsageRecord`] after each generated answer.
    pub record_usage: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            context_style: ContextStyle::default(),
            no_results_message: "Non ho trovato informazioni rilevanti su questo argomento nei testi di Péguy. Prova a riformulare la domanda.".to_string(),
            excerpt_chars: 200,
            record_usage: true,
        }
    }
}

/// One cited passage in a [`ChatResponse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub title: String,
    /// Leading excerpt of the chunk text.
    pub text: String,
    /// Similarity rounded to two decimals; absent for unranked policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Successful chat result, serialized as the HTTP response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

/// Wires a retriever, a generator, and the usage sink together.
pub struct ChatPipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn AnswerGenerator>,
    usage_sink: Arc<dyn CorpusStore>,
    settings: ChatSettings,
}

impl ChatPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn AnswerGenerator>,
        usage_sink: Arc<dyn CorpusStore>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            usage_sink,
            settings,
        }
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    /// Run the full pipeline for one question.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Validation`] for a missing or blank question; no
    ///   collaborator is called.
    /// - [`ChatError::Retrieval`] when embedding or a required store query fails.
    /// - [`ChatError::Generation`] when the generator fails.
    pub async fn answer(&self, question: &str) -> Result<ChatResponse, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::Validation("question is empty".to_string()));
        }

        let started = Instant::now();
        info!(
            chars = question.chars().count(),
            policy = %self.retriever.policy(),
            "question received"
        );
        debug!(question, "question text");

        let retrieved = self.retriever.retrieve(question).await?;
        info!(
            chunks = retrieved.len(),
            path = ?retrieved.path,
            "retrieval finished"
        );

        if retrieved.is_empty() {
            return Ok(ChatResponse {
                answer: self.settings.no_results_message.clone(),
                sources: Vec::new(),
            });
        }

        let context = assemble(&retrieved.chunks, &self.settings.context_style);
        let generation_started = Instant::now();
        let answer = self
            .generator
            .generate_answer(&context, question, &self.settings.instructions)
            .await?;
        info!(
            model = self.generator.model_name(),
            elapsed_ms = generation_started.elapsed().as_millis() as u64,
            "answer generated"
        );

        if self.settings.record_usage {
            let record = UsageRecord {
                question: question.to_string(),
                response_time_ms: started.elapsed().as_millis() as u64,
                chunks_used: retrieved.len(),
            };
            if let Err(e) = self.usage_sink.record_usage(&record).await {
                warn!(store = self.usage_sink.name(), error = %format!("{e:#}"), "failed to record usage");
            }
        }

        Ok(ChatResponse {
            answer,
            sources: self.sources(&retrieved.chunks),
        })
    }

    fn sources(&self, chunks: &[RetrievedChunk]) -> Vec<Source> {
        chunks
            .iter()
            .map(|c| Source {
                title: c
                    .title
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| self.settings.context_style.untitled_label.clone()),
                text: excerpt(&c.text, self.settings.excerpt_chars),
                similarity: c.similarity.map(round2),
            })
            .collect()
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
