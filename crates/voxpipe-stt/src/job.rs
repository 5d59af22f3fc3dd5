//! Drives one transcription job through its state machine.
//!
//! The runner owns the claim, decode, segment, pool, and finish steps;
//! every status transition goes through `Storage` so concurrent workers
//! stay mutually exclusive.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use voxpipe_audio::{decoder, AudioDecoder, Waveform};
use voxpipe_foundation::{AppConfig, AudioError};
use voxpipe_storage::{JobStatus, Storage, StorageError, Transcription};
use voxpipe_vad::{SegmentPlanner, SegmenterConfig};

use crate::engine::{SpeechEngine, SttError};
use crate::pool::DecodePool;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Transcription {id} not found")]
    NotFound { id: String },
    #[error("Transcription {id} already claimed or not pending")]
    AlreadyClaimed { id: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct JobRunner {
    storage: Arc<dyn Storage>,
    decoder: AudioDecoder,
    pool: DecodePool,
    config: AppConfig,
}

impl JobRunner {
    pub fn new(storage: Arc<dyn Storage>, engine: Arc<dyn SpeechEngine>, config: AppConfig) -> Self {
        let pool = DecodePool::new(
            engine,
            config.engine.max_workers,
            Duration::from_secs(config.engine.call_timeout_secs),
        );
        Self {
            storage,
            decoder: AudioDecoder::new("ffmpeg", Duration::from_secs(180)),
            pool,
            config,
        }
    }

    /// Register a new pending job. The VAD flag is resolved here, once,
    /// from the request and the configured default.
    pub fn submit(&self, use_vad: bool) -> Result<Transcription, JobError> {
        let job = Transcription::new_pending(use_vad && self.config.vad.enabled);
        self.storage.insert_transcription(&job)?;
        info!(target: "job", "Submitted transcription {} (vad={})", job.id, job.vad_enabled);
        Ok(job)
    }

    /// Claim and fully process one pending job against an audio file.
    pub async fn run_job(&self, id: &str, input: &Path) -> Result<Transcription, JobError> {
        if !self.storage.claim_transcription(id, Utc::now())? {
            return Err(JobError::AlreadyClaimed { id: id.to_string() });
        }

        match self.load_audio(input).await {
            Ok(waveform) => self.transcribe_claimed(id, &waveform).await,
            Err(e) => {
                warn!(target: "job", "Audio load failed for {id}: {e}");
                self.fail_job(id, &e.to_string())
            }
        }
    }

    async fn load_audio(&self, input: &Path) -> Result<Waveform, AudioError> {
        decoder::validate_input(input, &self.config.limits)?;
        self.decoder.decode_to_waveform(input).await
    }

    /// Segment, decode, and finish an already-claimed job.
    ///
    /// Callers must hold the claim; the terminal write still goes
    /// through `finish_transcription`, which rejects anything not in
    /// `processing`.
    pub async fn transcribe_claimed(
        &self,
        id: &str,
        waveform: &Waveform,
    ) -> Result<Transcription, JobError> {
        let mut job = self
            .storage
            .get_transcription(id)?
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;

        let planner = SegmentPlanner::new(SegmenterConfig {
            vad_enabled: job.vad_enabled,
            min_silence_len_ms: self.config.vad.min_silence_len_ms,
            silence_thresh_dbfs: self.config.vad.silence_thresh_dbfs,
            segment_length_ms: self.config.engine.segment_length_ms,
            ..SegmenterConfig::default()
        });
        let spans = planner.plan(waveform);

        let started = Instant::now();
        match self.pool.transcribe_spans(waveform, &spans).await {
            Ok(outcome) => {
                job.status = JobStatus::Done;
                job.language = self
                    .config
                    .engine
                    .language
                    .clone()
                    .or(outcome.language);
                job.duration = Some(waveform.duration_secs());
                job.processing_time = Some(started.elapsed().as_secs_f64());
                job.segments_count = outcome.segments.len();
                job.segments = outcome.segments;
                job.text = Some(outcome.text);
                job.error_message = None;
                job.finished_at = Some(Utc::now());
                self.storage.finish_transcription(&job)?;
                info!(
                    target: "job",
                    "Transcription {} done: {} segments, {} failed",
                    job.id, job.segments_count, outcome.failed_spans
                );
                Ok(job)
            }
            Err(e @ SttError::AllSegmentsFailed { .. }) => {
                warn!(target: "job", "Transcription {id} lost every segment: {e}");
                self.fail_job(id, &e.to_string())
            }
            Err(e) => {
                warn!(target: "job", "Transcription {id} decode failed: {e}");
                self.fail_job(id, &e.to_string())
            }
        }
    }

    fn fail_job(&self, id: &str, message: &str) -> Result<Transcription, JobError> {
        let mut job = self
            .storage
            .get_transcription(id)?
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        job.status = JobStatus::Error;
        job.error_message = Some(message.to_string());
        job.finished_at = Some(Utc::now());
        self.storage.finish_transcription(&job)?;
        Ok(job)
    }
}
