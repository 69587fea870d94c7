//! System instructions and user-turn framing for the answer generator.
//!
//! The instruction text is assembled from [`PromptConfig`] rather than
//! hard-coded, so citation style, quote translation, and off-topic refusal
//! can be switched per deployment.

use serde::Deserialize;

/// How quotations should be rendered in answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStyle {
    /// Quoted inline between quotation marks.
    #[default]
    Inline,
    /// Markdown blockquotes.
    Blockquote,
}

/// Instruction settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Opening role sentence.
    pub persona: String,
    /// Subject the assistant is restricted to; used by the refusal rule.
    pub topic: String,
    pub grounding_rule: String,
    pub quote_style: QuoteStyle,
    /// Translate quotations from `source_language` into `target_language`.
    pub translate_quotes: bool,
    pub source_language: String,
    pub target_language: String,
    /// Appended to answers that contain translated quotations.
    pub translation_note: Option<String>,
    /// Exact reply for off-topic questions. `None` disables the rule.
    pub refusal_message: Option<String>,
    /// Free text appended after the generated rules.
    pub extra_instructions: Option<String>,
    /// Heading placed before the assembled context in the user turn.
    pub context_label: String,
    /// Prefix placed before the question in the user turn.
    pub question_label: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: "Sei un esperto di Charles Péguy.".to_string(),
            topic: "Charles Péguy e le sue opere".to_string(),
            grounding_rule: "Rispondi SOLO in base ai testi forniti nel messaggio dell'utente. \
                Se non contengono la risposta, dillo."
                .to_string(),
            quote_style: QuoteStyle::Inline,
            translate_quotes: false,
            source_language: "francese".to_string(),
            target_language: "italiano".to_string(),
            translation_note: None,
            refusal_message: None,
            extra_instructions: None,
            context_label: "Testi rilevanti".to_string(),
            question_label: "Domanda".to_string(),
        }
    }
}

/// Build the system instruction string.
pub fn build_instructions(config: &PromptConfig) -> String {
    let mut lines = vec![config.persona.clone(), config.grounding_rule.clone()];

    if let Some(refusal) = &config.refusal_message {
        lines.push(format!(
            "Rispondi solo a domande su {}. A qualsiasi altra domanda rispondi cortesemente esattamente con: \"{}\"",
            config.topic, refusal
        ));
    }

    lines.push(match config.quote_style {
        QuoteStyle::Inline => "Metti sempre i passi citati tra virgolette e indica l'opera da cui provengono.".to_string(),
        QuoteStyle::Blockquote => "Riporta ogni passo citato come blockquote Markdown (righe che iniziano con \"> \") e indica subito dopo l'opera da cui proviene.".to_string(),
    });

    if config.translate_quotes {
        lines.push(format!(
            "Quando citi un passo scritto in {}, traducilo in {}. \
             Mantieni il significato originale ma rendi il testo scorrevole e leggibile.",
            config.source_language, config.target_language
        ));
        if let Some(note) = &config.translation_note {
            lines.push(format!("Concludi la risposta con: \"{}\"", note));
        }
    }

    lines.push(format!(
        "Rispondi in {}, in modo chiaro, accurato ma accessibile.",
        config.target_language
    ));

    if let Some(extra) = &config.extra_instructions {
        lines.push(extra.clone());
    }

    lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptConfig {
    pub fn user_turn(&self) -> UserTurn {
        UserTurn {
            context_label: self.context_label.clone(),
            question_label: self.question_label.clone(),
        }
    }
}

/// Framing of the single user-turn message sent to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTurn {
    pub context_label: String,
    pub question_label: String,
}

impl Default for UserTurn {
    fn default() -> Self {
        PromptConfig::default().user_turn()
    }
}

impl UserTurn {
    /// Render the user message carrying context and question.
    pub fn render(&self, context: &str, question: &str) -> String {
        format!(
            "{}:\n\n{}\n\n---\n\n{}: {}",
            self.context_label, context, self.question_label, question
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_instructions_are_inline_without_refusal() {
        let text = build_instructions(&PromptConfig::default());
        assert!(text.starts_with("Sei un esperto di Charles Péguy."));
        assert!(text.contains("tra virgolette"));
        assert!(text.contains("Rispondi in italiano"));
        assert!(!text.contains("blockquote"));
        assert!(!text.contains("cortesemente"));
        assert!(!text.contains("traducilo"));
    }

    #[test]
    fn test_blockquote_translation_and_refusal() {
        let config = PromptConfig {
            quote_style: QuoteStyle::Blockquote,
            translate_quotes: true,
            translation_note: Some(
                "Nota: Le citazioni sono tradotte dal francese originale.".into(),
            ),
            refusal_message: Some(
                "Mi dispiace, posso rispondere solo a domande su Charles Péguy e le sue opere."
                    .into(),
            ),
            ..PromptConfig::default()
        };
        let text = build_instructions(&config);
        assert!(text.contains("blockquote Markdown"));
        assert!(text.contains("scritto in francese, traducilo in italiano"));
        assert!(text.contains("Nota: Le citazioni sono tradotte dal francese originale."));
        assert!(text.contains("Charles Péguy e le sue opere"));
        assert!(text.contains("cortesemente esattamente con: \"Mi dispiace"));
    }

    #[test]
    fn test_translation_note_requires_translation() {
        let config = PromptConfig {
            translation_note: Some("Nota finale".into()),
            ..PromptConfig::default()
        };
        assert!(!build_instructions(&config).contains("Nota finale"));
    }

    #[test]
    fn test_user_message_layout() {
        let msg = UserTurn::default().render("[1] Da \"X\":\ntesto", "Chi era?");
        assert_eq!(
            msg,
            "Testi rilevanti:\n\n[1] Da \"X\":\ntesto\n\n---\n\nDomanda: Chi era?"
        );
    }
}
