//! Answer generator abstraction.
//!
//! The hosted chat-completion backend lives in the app crate; the pipeline
//! only sees this trait.

use async_trait::async_trait;

use crate::error::GenerationError;

/// Produces grounded prose from assembled context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Answer `question` using `context`, following `instructions`.
    ///
    /// `instructions` is sent as the system prompt; context and question
    /// travel together in one user turn.
    async fn generate_answer(
        &self,
        context: &str,
        question: &str,
        instructions: &str,
    ) -> Result<String, GenerationError>;
}
