//! Context assembly: turns retrieved chunks into one prompt-ready text block.
//!
//! Each chunk becomes an ordinal-numbered block:
//!
//! ```text
//! [1] From "Le Porche du mystère de la deuxième vertu":
//! La foi que j'aime le mieux, dit Dieu, c'est l'espérance.
//!
//! ---
//!
//! [2] From "Untitled work":
//! ...
//! ```
//!
//! Order and content are exactly what the retriever delivered. Nothing is
//! truncated or re-ranked here.

use serde::Deserialize;

use crate::models::RetrievedChunk;

/// How consecutive blocks are separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    /// A horizontal rule between blank lines.
    #[default]
    Rule,
    /// A single blank line.
    Blank,
}

impl Separator {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "\n\n---\n\n",
            Self::Blank => "\n\n",
        }
    }
}

/// Labels used when rendering blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextStyle {
    /// Word introducing the title, e.g. `From` or `Da`.
    pub source_label: String,
    /// Title used when a chunk has none.
    pub untitled_label: String,
    pub separator: Separator,
}

impl Default for ContextStyle {
    fn default() -> Self {
        Self {
            source_label: "From".to_string(),
            untitled_label: "Untitled work".to_string(),
            separator: Separator::Rule,
        }
    }
}

/// Render `chunks` as numbered blocks, in order.
///
/// Returns an empty string for an empty slice.
pub fn assemble(chunks: &[RetrievedChunk], style: &ContextStyle) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let title = chunk
                .title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(&style.untitled_label);
            format!(
                "[{}] {} \"{}\":\n{}",
                i + 1,
                style.source_label,
                title,
                chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(style.separator.as_str())
}
