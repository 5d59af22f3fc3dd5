//! Prompt construction for the enrichment pass.
//!
//! The model is asked for labeled plain text (one marker per field)
//! rather than a structured format, so the parser has to be tolerant
//! but the prompt does not depend on any model-side formatting mode.

use voxpipe_foundation::EnrichmentSettings;

const SYSTEM_PROMPT_FR: &str = "Tu es un assistant spécialisé dans l'analyse d'appels clients. \
Tu génères des résumés clairs, concis et professionnels en français.";

const SYSTEM_PROMPT_EN: &str = "You are an assistant specialized in analyzing customer calls. \
You produce clear, concise, professional summaries in English.";

/// Truncate a transcript to `max_chars`, cutting on a word boundary
/// and appending an ellipsis when anything was dropped.
pub fn truncate_transcript(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(at) => &cut[..at],
        None => cut.as_str(),
    };
    format!("{trimmed}...")
}

pub struct PromptBuilder {
    settings: EnrichmentSettings,
}

impl PromptBuilder {
    pub fn new(settings: EnrichmentSettings) -> Self {
        Self { settings }
    }

    fn french(&self) -> bool {
        self.settings.prompt_language != "en"
    }

    /// Build the single all-in-one instruction for a (pre-truncated)
    /// transcript, requesting only the enabled fields.
    pub fn build(&self, transcript: &str) -> String {
        let fr = self.french();
        let s = &self.settings;

        let mut asks = Vec::new();
        let mut format_lines = Vec::new();
        if s.generate_title {
            asks.push(if fr {
                "un titre court (10 mots maximum)"
            } else {
                "a short title (10 words maximum)"
            });
            format_lines.push(if fr { "Titre: ..." } else { "Title: ..." });
        }
        if s.generate_summary {
            asks.push(if fr {
                "un résumé en 2-3 phrases"
            } else {
                "a 2-3 sentence summary"
            });
            format_lines.push(if fr { "Résumé: ..." } else { "Summary: ..." });
        }
        if s.generate_bullets {
            asks.push(if fr {
                "3 à 5 points clés"
            } else {
                "3 to 5 key points"
            });
            format_lines.push("- ...\n- ...\n- ...");
        }
        if s.generate_sentiment {
            asks.push(if fr {
                "le sentiment général (positif, negatif, neutre ou mixte) avec un score de confiance entre 0 et 1"
            } else {
                "the overall sentiment (positive, negative, neutral or mixed) with a confidence score between 0 and 1"
            });
            format_lines.push(if fr {
                "Sentiment: neutre (0.8)"
            } else {
                "Sentiment: neutral (0.8)"
            });
        }
        if s.generate_topics {
            asks.push(if fr {
                "les thèmes principaux, séparés par des virgules"
            } else {
                "the main topics, comma separated"
            });
            format_lines.push(if fr {
                "Thèmes: thème 1, thème 2"
            } else {
                "Topics: topic 1, topic 2"
            });
        }

        let numbered: String = asks
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}. {a}\n", i + 1))
            .collect();

        let instruction = if fr {
            format!(
                "Analyse cette transcription d'appel et génère :\n{numbered}\n\
                 Transcription :\n{transcript}\n\n\
                 Réponds exactement dans ce format :\n{}",
                format_lines.join("\n")
            )
        } else {
            format!(
                "Analyze this call transcript and produce:\n{numbered}\n\
                 Transcript:\n{transcript}\n\n\
                 Answer exactly in this format:\n{}",
                format_lines.join("\n")
            )
        };

        let system = if fr { SYSTEM_PROMPT_FR } else { SYSTEM_PROMPT_EN };
        format!("<s>[INST] {system}\n\n{instruction} [/INST]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_short_text_untouched() {
        assert_eq!(truncate_transcript("hello world", 100), "hello world");
    }

    #[test]
    fn truncation_cuts_on_word_boundary_with_ellipsis() {
        let out = truncate_transcript("alpha beta gamma delta", 12);
        assert_eq!(out, "alpha beta...");
    }

    #[test]
    fn prompt_includes_only_enabled_sections() {
        let mut settings = EnrichmentSettings::default();
        settings.prompt_language = "en".to_string();
        settings.generate_topics = false;
        settings.generate_sentiment = false;
        let prompt = PromptBuilder::new(settings).build("some transcript");
        assert!(prompt.contains("Title:"));
        assert!(prompt.contains("Summary:"));
        assert!(prompt.contains("some transcript"));
        assert!(!prompt.contains("Sentiment:"));
        assert!(!prompt.contains("Topics:"));
    }

    #[test]
    fn default_language_is_french() {
        let prompt = PromptBuilder::new(EnrichmentSettings::default()).build("texte");
        assert!(prompt.contains("Titre:"));
        assert!(prompt.contains("Résumé:"));
        assert!(prompt.starts_with("<s>[INST]"));
    }
}
