//! Parsing and validation of the model's labeled plain-text output.
//!
//! The model is asked to follow marker lines; real output drifts, so
//! extraction is line-based and case-insensitive on markers, in both
//! prompt languages. A validation failure on any enabled field fails
//! the whole attempt; disabled fields are never extracted.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use voxpipe_foundation::EnrichmentSettings;
use voxpipe_storage::Sentiment;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:titre|title)\s*:\s*(.+)$").unwrap());
static SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:résumé|resume|summary)\s*:\s*(.*)$").unwrap());
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-•*]|\d+[.)])\s+(.+)$").unwrap());
static SENTIMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*sentiment\s*:\s*(.+)$").unwrap());
static TOPICS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:thèmes|themes|topics)\s*:\s*(.+)$").unwrap());
static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*([0-9]*\.?[0-9]+)\s*\)").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

const MAX_TITLE_WORDS: usize = 10;
const MIN_BULLETS: usize = 3;
const MAX_BULLETS: usize = 5;

/// Fallback when the model states a sentiment but omits the score.
const DEFAULT_SENTIMENT_CONFIDENCE: f64 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("No title line found in model output")]
    MissingTitle,
    #[error("No summary found in model output")]
    MissingSummary,
    #[error("Expected {MIN_BULLETS}-{MAX_BULLETS} bullets, found {found}")]
    BulletCount { found: usize },
    #[error("No sentiment line found in model output")]
    MissingSentiment,
    #[error("Unrecognized sentiment label: {0:?}")]
    UnknownSentiment(String),
    #[error("Sentiment confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),
}

/// Validated fields of one enrichment attempt. Disabled fields stay
/// `None`/empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEnrichment {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub bullets: Vec<String>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_confidence: Option<f64>,
    pub topics: Option<Vec<String>>,
}

/// Parse raw model output against the enabled feature flags.
///
/// All-or-nothing: any enabled field that fails validation discards
/// the whole attempt.
pub fn parse_response(
    raw: &str,
    settings: &EnrichmentSettings,
) -> Result<ParsedEnrichment, ParseError> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut out = ParsedEnrichment::default();

    if settings.generate_title {
        let title = lines
            .iter()
            .find_map(|l| TITLE_RE.captures(l))
            .map(|c| clean_fragment(&c[1]))
            .filter(|t| !t.is_empty())
            .ok_or(ParseError::MissingTitle)?;
        out.title = Some(truncate_words(&title, MAX_TITLE_WORDS));
    }

    if settings.generate_summary {
        out.summary = Some(extract_summary(&lines)?);
    }

    if settings.generate_bullets {
        let bullets: Vec<String> = lines
            .iter()
            .filter_map(|l| BULLET_RE.captures(l))
            .map(|c| clean_fragment(&c[1]))
            .filter(|b| !b.is_empty())
            .take(MAX_BULLETS)
            .collect();
        if bullets.len() < MIN_BULLETS {
            return Err(ParseError::BulletCount {
                found: bullets.len(),
            });
        }
        out.bullets = bullets;
    }

    if settings.generate_sentiment {
        let raw_label = lines
            .iter()
            .find_map(|l| SENTIMENT_RE.captures(l))
            .map(|c| c[1].to_string())
            .ok_or(ParseError::MissingSentiment)?;
        let (sentiment, confidence) = parse_sentiment(&raw_label)?;
        out.sentiment = Some(sentiment);
        out.sentiment_confidence = Some(confidence);
    }

    if settings.generate_topics {
        out.topics = lines
            .iter()
            .find_map(|l| TOPICS_RE.captures(l))
            .map(|c| {
                c[1].split(',')
                    .map(|t| clean_fragment(t))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|t: &Vec<String>| !t.is_empty());
    }

    Ok(out)
}

/// Summary is the marker line's remainder plus following plain lines,
/// up to the next marker or bullet.
fn extract_summary(lines: &[&str]) -> Result<String, ParseError> {
    let start = lines
        .iter()
        .position(|l| SUMMARY_RE.is_match(l))
        .ok_or(ParseError::MissingSummary)?;

    let mut parts = Vec::new();
    if let Some(c) = SUMMARY_RE.captures(lines[start]) {
        let head = clean_fragment(&c[1]);
        if !head.is_empty() {
            parts.push(head);
        }
    }
    for line in &lines[start + 1..] {
        if line.trim().is_empty()
            || BULLET_RE.is_match(line)
            || TITLE_RE.is_match(line)
            || SENTIMENT_RE.is_match(line)
            || TOPICS_RE.is_match(line)
        {
            break;
        }
        parts.push(clean_fragment(line));
    }

    let summary = parts.join(" ").trim().to_string();
    if summary.is_empty() {
        return Err(ParseError::MissingSummary);
    }
    Ok(summary)
}

fn parse_sentiment(raw: &str) -> Result<(Sentiment, f64), ParseError> {
    let confidence = match CONFIDENCE_RE.captures(raw) {
        Some(c) => {
            let value: f64 = c[1]
                .parse()
                .map_err(|_| ParseError::UnknownSentiment(raw.trim().to_string()))?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ParseError::ConfidenceOutOfRange(value));
            }
            value
        }
        None => DEFAULT_SENTIMENT_CONFIDENCE,
    };

    let label = CONFIDENCE_RE.replace(raw, "").trim().to_lowercase();
    let sentiment = match label.as_str() {
        "positif" => Sentiment::Positive,
        "negatif" | "négatif" => Sentiment::Negative,
        "neutre" => Sentiment::Neutral,
        "mixte" => Sentiment::Mixed,
        other => Sentiment::from_str(other)
            .map_err(|_| ParseError::UnknownSentiment(label.clone()))?,
    };
    Ok((sentiment, confidence))
}

/// Strip residual tags, wrapping quotes, and marker artifacts.
fn clean_fragment(text: &str) -> String {
    let text = TAG_RE.replace_all(text, "");
    let text = text.replace("[INST]", "").replace("[/INST]", "");
    let mut text = text.trim();
    if text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
    {
        text = &text[1..text.len() - 1];
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> EnrichmentSettings {
        let mut s = EnrichmentSettings::default();
        s.generate_topics = false;
        s
    }

    #[test]
    fn canonical_labeled_output_parses_fully() {
        let raw = "Title: Foo\nSummary: A. B.\n- x\n- y\n- z\nSentiment: positive (0.9)";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Foo"));
        assert_eq!(parsed.summary.as_deref(), Some("A. B."));
        assert_eq!(parsed.bullets, vec!["x", "y", "z"]);
        assert_eq!(parsed.sentiment, Some(Sentiment::Positive));
        assert_eq!(parsed.sentiment_confidence, Some(0.9));
        assert!(parsed.topics.is_none());
    }

    #[test]
    fn french_markers_and_labels_parse() {
        let raw = "Titre: Annulation de commande\n\
                   Résumé: Le client annule. Le conseiller confirme.\n\
                   - demande d'annulation\n\
                   - remboursement promis\n\
                   - client satisfait\n\
                   Sentiment: positif (0.85)";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Annulation de commande"));
        assert_eq!(parsed.sentiment, Some(Sentiment::Positive));
        assert_eq!(parsed.sentiment_confidence, Some(0.85));
    }

    #[test]
    fn unrecognized_sentiment_label_is_a_failure() {
        let raw = "Title: Foo\nSummary: Text here.\n- a\n- b\n- c\nSentiment: ambivalent (0.7)";
        let err = parse_response(raw, &all_on()).unwrap_err();
        assert_eq!(err, ParseError::UnknownSentiment("ambivalent".into()));
    }

    #[test]
    fn missing_confidence_defaults_to_half() {
        let raw = "Title: Foo\nSummary: Text.\n- a\n- b\n- c\nSentiment: neutral";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(parsed.sentiment, Some(Sentiment::Neutral));
        assert_eq!(parsed.sentiment_confidence, Some(0.5));
    }

    #[test]
    fn confidence_above_one_is_rejected() {
        let raw = "Title: Foo\nSummary: Text.\n- a\n- b\n- c\nSentiment: positive (1.5)";
        let err = parse_response(raw, &all_on()).unwrap_err();
        assert_eq!(err, ParseError::ConfidenceOutOfRange(1.5));
    }

    #[test]
    fn long_title_is_truncated_to_ten_words() {
        let raw = "Title: one two three four five six seven eight nine ten eleven twelve\n\
                   Summary: Text.\n- a\n- b\n- c\nSentiment: neutral (0.5)";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(
            parsed.title.as_deref(),
            Some("one two three four five six seven eight nine ten")
        );
    }

    #[test]
    fn too_few_bullets_fail_validation() {
        let raw = "Title: Foo\nSummary: Text.\n- only\n- two\nSentiment: neutral (0.5)";
        let err = parse_response(raw, &all_on()).unwrap_err();
        assert_eq!(err, ParseError::BulletCount { found: 2 });
    }

    #[test]
    fn extra_bullets_are_capped_at_five() {
        let raw = "Title: Foo\nSummary: Text.\n- a\n- b\n- c\n- d\n- e\n- f\n- g\n\
                   Sentiment: neutral (0.5)";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(parsed.bullets.len(), 5);
        assert_eq!(parsed.bullets[4], "e");
    }

    #[test]
    fn multiline_summary_stops_at_next_marker() {
        let raw = "Title: Foo\nSummary: First sentence.\nSecond sentence.\n\
                   - a\n- b\n- c\nSentiment: mixed (0.6)";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(
            parsed.summary.as_deref(),
            Some("First sentence. Second sentence.")
        );
        assert_eq!(parsed.sentiment, Some(Sentiment::Mixed));
    }

    #[test]
    fn disabled_fields_are_not_required() {
        let mut settings = all_on();
        settings.generate_title = false;
        settings.generate_sentiment = false;
        let raw = "Summary: Just a summary.\n- a\n- b\n- c";
        let parsed = parse_response(raw, &settings).unwrap();
        assert!(parsed.title.is_none());
        assert!(parsed.sentiment.is_none());
        assert_eq!(parsed.bullets.len(), 3);
    }

    #[test]
    fn topics_parse_when_enabled() {
        let mut settings = all_on();
        settings.generate_topics = true;
        let raw = "Title: Foo\nSummary: Text.\n- a\n- b\n- c\n\
                   Sentiment: neutral (0.5)\nTopics: billing, refund , shipping";
        let parsed = parse_response(raw, &settings).unwrap();
        assert_eq!(
            parsed.topics,
            Some(vec![
                "billing".to_string(),
                "refund".to_string(),
                "shipping".to_string()
            ])
        );
    }

    #[test]
    fn quoted_title_loses_its_quotes() {
        let raw = "Title: \"Quoted title\"\nSummary: Text.\n- a\n- b\n- c\nSentiment: neutral";
        let parsed = parse_response(raw, &all_on()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Quoted title"));
    }
}
