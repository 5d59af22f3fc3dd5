//! Persisted record shapes.
//!
//! Field names, enum value sets, and the segment ordering invariant are
//! part of the storage contract; serialization must preserve them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown status: {other:?}")),
        }
    }
}

/// One decoded span of a transcription, owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Span start in seconds.
    pub start: f64,
    /// Span end in seconds, strictly greater than `start`.
    pub end: f64,
    /// Recognized text; empty when the engine returned nothing or the
    /// decode call failed.
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: String,
    pub status: JobStatus,
    pub language: Option<String>,
    pub duration: Option<f64>,
    pub processing_time: Option<f64>,
    pub text: Option<String>,
    /// Ordered by `start` ascending, non-overlapping.
    pub segments: Vec<Segment>,
    pub segments_count: usize,
    pub vad_enabled: bool,
    pub enrichment_requested: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transcription {
    /// A freshly submitted job, not yet claimed by any worker.
    pub fn new_pending(vad_enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            language: None,
            duration: None,
            processing_time: None,
            text: None,
            segments: Vec::new(),
            segments_count: 0,
            vad_enabled,
            enrichment_requested: true,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Mixed => "mixed",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            "mixed" => Ok(Self::Mixed),
            other => Err(format!("unknown sentiment: {other:?}")),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured, model-derived annotation of a completed transcript.
/// At most one per transcription; written only by the poll worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub id: String,
    pub transcription_id: String,
    pub status: JobStatus,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Insertion order is presentation order.
    pub bullets: Vec<String>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_confidence: Option<f64>,
    pub topics: Option<Vec<String>>,
    pub model_used: Option<String>,
    pub generation_time: Option<f64>,
    pub tokens_generated: Option<u64>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Enrichment {
    pub fn new_pending(transcription_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            transcription_id: transcription_id.to_string(),
            status: JobStatus::Pending,
            title: None,
            summary: None,
            bullets: Vec::new(),
            sentiment: None,
            sentiment_confidence: None,
            topics: None,
            model_used: None,
            generation_time: None,
            tokens_generated: None,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptionFilter {
    pub status: Option<JobStatus>,
    pub text_contains: Option<String>,
    pub limit: Option<usize>,
}
