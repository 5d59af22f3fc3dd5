//! Bounded parallel decode of planned segment spans.
//!
//! Spans are decoded concurrently up to `max_workers`, but the merged
//! transcript is always assembled in span order regardless of task
//! completion order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use voxpipe_audio::Waveform;
use voxpipe_storage::Segment;
use voxpipe_vad::SegmentSpan;

use crate::engine::{EngineOutput, SpeechEngine, SttError};

/// Merged result of decoding every span of one job.
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    /// One segment per planned span, in span order. Spans whose decode
    /// failed contribute an empty-text segment.
    pub segments: Vec<Segment>,
    /// Non-empty segment texts joined with single spaces.
    pub text: String,
    /// First language the engine reported, in span order.
    pub language: Option<String>,
    pub failed_spans: usize,
}

pub struct DecodePool {
    engine: Arc<dyn SpeechEngine>,
    max_workers: usize,
    call_timeout: Duration,
}

impl DecodePool {
    pub fn new(engine: Arc<dyn SpeechEngine>, max_workers: usize, call_timeout: Duration) -> Self {
        Self {
            engine,
            max_workers: max_workers.max(1),
            call_timeout,
        }
    }

    /// Decode all spans of a waveform and merge the results.
    ///
    /// A failed or timed-out span degrades to an empty segment; only
    /// the total loss of every span fails the job.
    pub async fn transcribe_spans(
        &self,
        waveform: &Waveform,
        spans: &[SegmentSpan],
    ) -> Result<PoolOutcome, SttError> {
        if spans.is_empty() {
            return Ok(PoolOutcome {
                segments: Vec::new(),
                text: String::new(),
                language: None,
                failed_spans: 0,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks: JoinSet<(usize, Result<EngineOutput, SttError>)> = JoinSet::new();

        for (index, span) in spans.iter().enumerate() {
            let audio = waveform.slice_ms(span.start_ms, span.end_ms).to_vec();
            let engine = Arc::clone(&self.engine);
            let permit_source = Arc::clone(&semaphore);
            let timeout = self.call_timeout;
            tasks.spawn(async move {
                let _permit = match permit_source.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (index, Err(SttError::Engine("pool closed".into()))),
                };
                let result = match tokio::time::timeout(timeout, engine.transcribe(&audio)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(SttError::Timeout {
                        seconds: timeout.as_secs(),
                    }),
                };
                (index, result)
            });
        }

        // Completion order is nondeterministic; park each result in its
        // span slot before assembling anything.
        let mut slots: Vec<Option<Result<EngineOutput, SttError>>> =
            (0..spans.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(target: "stt", "Decode task aborted: {e}"),
            }
        }

        let mut segments = Vec::with_capacity(spans.len());
        let mut language = None;
        let mut failed = 0usize;
        for (span, slot) in spans.iter().zip(slots) {
            let text = match slot {
                Some(Ok(out)) => {
                    if language.is_none() {
                        language = out.language.filter(|l| !l.is_empty());
                    }
                    out.text.trim().to_string()
                }
                Some(Err(e)) => {
                    warn!(
                        target: "stt",
                        "Segment {}..{}ms decode failed: {e}", span.start_ms, span.end_ms
                    );
                    failed += 1;
                    String::new()
                }
                None => {
                    failed += 1;
                    String::new()
                }
            };
            segments.push(Segment {
                start: span.start_ms as f64 / 1000.0,
                end: span.end_ms as f64 / 1000.0,
                text,
            });
        }

        if failed == spans.len() {
            return Err(SttError::AllSegmentsFailed { count: failed });
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(
            target: "stt",
            "Decoded {} spans ({} failed) with {}", spans.len(), failed, self.engine.name()
        );

        Ok(PoolOutcome {
            segments,
            text,
            language,
            failed_spans: failed,
        })
    }
}
