//! The enrichment poll worker.
//!
//! A single long-lived loop: each tick selects a batch of eligible
//! transcriptions and drives them through the model one at a time.
//! The loaded model is exclusively owned for the duration of a call,
//! so batch items are strictly sequential.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use voxpipe_foundation::EnrichmentSettings;
use voxpipe_storage::{Enrichment, JobStatus, Storage, StorageError, Transcription};

use crate::llm::{GenerationParams, LanguageModel, LlmError};
use crate::parser::parse_response;
use crate::prompt::{truncate_transcript, PromptBuilder};

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

enum ItemOutcome {
    Succeeded,
    Failed,
    Skipped,
}

pub struct EnrichmentWorker {
    storage: Arc<dyn Storage>,
    model: Arc<dyn LanguageModel>,
    prompts: PromptBuilder,
    params: GenerationParams,
    settings: EnrichmentSettings,
    stats: WorkerStats,
}

impl EnrichmentWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        model: Arc<dyn LanguageModel>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            storage,
            model,
            prompts: PromptBuilder::new(settings.clone()),
            params: GenerationParams::from(&settings),
            settings,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Run forever at the configured poll cadence. Callers select
    /// against a shutdown signal to stop the loop.
    pub async fn run(&mut self) {
        info!(
            target: "enrich",
            "Enrichment worker started (poll every {}s, batch {})",
            self.settings.poll_interval_seconds, self.settings.batch_size
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(0) => {}
                Ok(n) => {
                    let s = self.stats;
                    info!(
                        target: "enrich",
                        "Tick handled {n} items (total: {} ok, {} failed, {} skipped)",
                        s.succeeded, s.failed, s.skipped
                    );
                }
                Err(e) => warn!(target: "enrich", "Tick failed: {e}"),
            }
        }
    }

    /// One poll cycle: select a batch and process it sequentially.
    /// A single item's failure never aborts the rest of the batch.
    pub async fn tick(&mut self) -> Result<usize, StorageError> {
        let retry_cutoff =
            Utc::now() - chrono::Duration::seconds(self.settings.retry_delay_seconds as i64);
        let batch = self.storage.enrichment_candidates(
            self.settings.batch_size,
            retry_cutoff,
            self.settings.max_retries,
        )?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(target: "enrich", "Selected {} enrichment candidates", batch.len());

        let mut handled = 0;
        for transcription in &batch {
            match self.process_one(transcription).await {
                Ok(ItemOutcome::Succeeded) => {
                    handled += 1;
                    self.stats.processed += 1;
                    self.stats.succeeded += 1;
                }
                Ok(ItemOutcome::Failed) => {
                    handled += 1;
                    self.stats.processed += 1;
                    self.stats.failed += 1;
                }
                Ok(ItemOutcome::Skipped) => {
                    self.stats.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        target: "enrich",
                        "Enrichment of {} hit a storage error: {e}", transcription.id
                    );
                }
            }
        }
        Ok(handled)
    }

    async fn process_one(
        &self,
        transcription: &Transcription,
    ) -> Result<ItemOutcome, StorageError> {
        let text = transcription.text.as_deref().unwrap_or("").trim();

        // Too-short transcripts are left untouched: no row is created,
        // so they are re-skipped cheaply on every later tick.
        if text.chars().count() < self.settings.min_transcription_chars {
            debug!(
                target: "enrich",
                "Skipping {}: transcript below {} chars",
                transcription.id, self.settings.min_transcription_chars
            );
            return Ok(ItemOutcome::Skipped);
        }

        self.storage.create_enrichment_if_absent(&transcription.id)?;
        let Some(mut enrichment) = self
            .storage
            .claim_enrichment(&transcription.id, Utc::now())?
        else {
            return Ok(ItemOutcome::Skipped);
        };

        let truncated = truncate_transcript(text, self.settings.max_transcription_chars);
        let prompt = self.prompts.build(&truncated);

        let started = Instant::now();
        let call_timeout = Duration::from_secs(self.settings.call_timeout_secs);
        let generation =
            match tokio::time::timeout(call_timeout, self.model.generate(&prompt, &self.params))
                .await
            {
                Ok(Ok(generation)) => generation,
                Ok(Err(e)) => {
                    self.record_failure(&mut enrichment, &e.to_string())?;
                    return Ok(ItemOutcome::Failed);
                }
                Err(_) => {
                    let e = LlmError::Timeout {
                        seconds: call_timeout.as_secs(),
                    };
                    self.record_failure(&mut enrichment, &e.to_string())?;
                    return Ok(ItemOutcome::Failed);
                }
            };

        match parse_response(&generation.text, &self.settings) {
            Ok(parsed) => {
                enrichment.status = JobStatus::Done;
                enrichment.title = parsed.title;
                enrichment.summary = parsed.summary;
                enrichment.bullets = parsed.bullets;
                enrichment.sentiment = parsed.sentiment;
                enrichment.sentiment_confidence = parsed.sentiment_confidence;
                enrichment.topics = parsed.topics;
                enrichment.model_used = Some(self.model.model_name());
                enrichment.generation_time = Some(started.elapsed().as_secs_f64());
                enrichment.tokens_generated = Some(generation.tokens_generated);
                enrichment.last_error = None;
                enrichment.finished_at = Some(Utc::now());
                self.storage.update_enrichment(&enrichment)?;
                info!(
                    target: "enrich",
                    "Enriched {} ({} tokens)", transcription.id, generation.tokens_generated
                );
                Ok(ItemOutcome::Succeeded)
            }
            Err(e) => {
                self.record_failure(&mut enrichment, &e.to_string())?;
                Ok(ItemOutcome::Failed)
            }
        }
    }

    /// Count the attempt; the row goes back to pending until the retry
    /// budget runs out, then turns terminally to error.
    fn record_failure(
        &self,
        enrichment: &mut Enrichment,
        message: &str,
    ) -> Result<(), StorageError> {
        enrichment.retry_count += 1;
        enrichment.last_error = Some(message.to_string());
        if enrichment.retry_count >= self.settings.max_retries {
            enrichment.status = JobStatus::Error;
            enrichment.finished_at = Some(Utc::now());
            warn!(
                target: "enrich",
                "Enrichment {} exhausted {} retries: {message}",
                enrichment.transcription_id, enrichment.retry_count
            );
        } else {
            enrichment.status = JobStatus::Pending;
            warn!(
                target: "enrich",
                "Enrichment {} attempt {} failed: {message}",
                enrichment.transcription_id, enrichment.retry_count
            );
        }
        self.storage.update_enrichment(enrichment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Generation, LlmError, MockLanguageModel};
    use voxpipe_storage::{MemoryStorage, Sentiment};

    const GOOD_OUTPUT: &str =
        "Title: Refund call\nSummary: Customer asked for a refund. Agent agreed.\n\
         - refund requested\n- agent approved\n- case closed\nSentiment: positive (0.9)";

    fn settings() -> EnrichmentSettings {
        let mut s = EnrichmentSettings::default();
        s.prompt_language = "en".to_string();
        s.retry_delay_seconds = 0;
        s.min_transcription_chars = 10;
        s.batch_size = 10;
        s
    }

    fn done_transcription(text: &str) -> Transcription {
        let mut t = Transcription::new_pending(true);
        t.status = JobStatus::Done;
        t.text = Some(text.to_string());
        t.finished_at = Some(Utc::now());
        t
    }

    fn long_transcript() -> String {
        "hello there, this transcript is comfortably long enough. ".repeat(4)
    }

    #[tokio::test]
    async fn successful_generation_lands_done_with_fields() {
        let storage = Arc::new(MemoryStorage::new());
        let t = done_transcription(&long_transcript());
        storage.insert_transcription(&t).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(1).returning(|_, _| {
            Ok(Generation {
                text: GOOD_OUTPUT.to_string(),
                tokens_generated: 120,
            })
        });
        model
            .expect_model_name()
            .returning(|| "test-model".to_string());

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        assert_eq!(worker.tick().await.unwrap(), 1);

        let e = storage.enrichment_for(&t.id).unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Done);
        assert_eq!(e.title.as_deref(), Some("Refund call"));
        assert_eq!(e.bullets.len(), 3);
        assert_eq!(e.sentiment, Some(Sentiment::Positive));
        assert_eq!(e.sentiment_confidence, Some(0.9));
        assert_eq!(e.model_used.as_deref(), Some("test-model"));
        assert_eq!(e.tokens_generated, Some(120));
        assert!(e.finished_at.is_some());
        assert_eq!(worker.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn unparseable_output_retries_then_lands_terminal_error() {
        let storage = Arc::new(MemoryStorage::new());
        let t = done_transcription(&long_transcript());
        storage.insert_transcription(&t).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(3).returning(|_, _| {
            Ok(Generation {
                text: "complete nonsense with no markers".to_string(),
                tokens_generated: 5,
            })
        });
        model
            .expect_model_name()
            .returning(|| "test-model".to_string());

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        for _ in 0..5 {
            worker.tick().await.unwrap();
        }

        let e = storage.enrichment_for(&t.id).unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Error);
        assert_eq!(e.retry_count, 3);
        assert!(e.last_error.is_some());
        assert!(e.title.is_none());
    }

    #[tokio::test]
    async fn done_enrichment_is_never_reprocessed() {
        let storage = Arc::new(MemoryStorage::new());
        let t = done_transcription(&long_transcript());
        storage.insert_transcription(&t).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(1).returning(|_, _| {
            Ok(Generation {
                text: GOOD_OUTPUT.to_string(),
                tokens_generated: 40,
            })
        });
        model
            .expect_model_name()
            .returning(|| "test-model".to_string());

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        worker.tick().await.unwrap();
        let first = storage.enrichment_for(&t.id).unwrap().unwrap();

        // Later ticks select nothing and never touch the model again.
        assert_eq!(worker.tick().await.unwrap(), 0);
        let second = storage.enrichment_for(&t.id).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn short_transcript_is_skipped_without_creating_a_row() {
        let storage = Arc::new(MemoryStorage::new());
        let t = done_transcription("short");
        storage.insert_transcription(&t).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(0);

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        for _ in 0..3 {
            worker.tick().await.unwrap();
        }

        assert!(storage.enrichment_for(&t.id).unwrap().is_none());
        assert_eq!(worker.stats().skipped, 3);
    }

    #[tokio::test]
    async fn stuck_generation_is_recorded_as_a_timeout() {
        use async_trait::async_trait;
        use crate::llm::Generation;

        struct StuckModel;

        #[async_trait]
        impl LanguageModel for StuckModel {
            async fn generate(
                &self,
                _prompt: &str,
                _params: &GenerationParams,
            ) -> Result<Generation, LlmError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(Generation {
                    text: String::new(),
                    tokens_generated: 0,
                })
            }

            fn model_name(&self) -> String {
                "stuck".to_string()
            }
        }

        let storage = Arc::new(MemoryStorage::new());
        let t = done_transcription(&long_transcript());
        storage.insert_transcription(&t).unwrap();

        let mut s = settings();
        s.call_timeout_secs = 0;
        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(StuckModel), s);
        assert_eq!(worker.tick().await.unwrap(), 1);

        let e = storage.enrichment_for(&t.id).unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Pending);
        assert_eq!(e.retry_count, 1);
        assert_eq!(
            e.last_error.as_deref(),
            Some("Generation timed out after 0s")
        );
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_batch() {
        let storage = Arc::new(MemoryStorage::new());
        let mut bad = done_transcription(&long_transcript());
        bad.text = Some(format!("BAD-MARKER {}", long_transcript()));
        let good = done_transcription(&long_transcript());
        storage.insert_transcription(&bad).unwrap();
        storage.insert_transcription(&good).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(2).returning(|prompt, _| {
            if prompt.contains("BAD-MARKER") {
                Err(LlmError::Backend("model crashed".to_string()))
            } else {
                Ok(Generation {
                    text: GOOD_OUTPUT.to_string(),
                    tokens_generated: 30,
                })
            }
        });
        model
            .expect_model_name()
            .returning(|| "test-model".to_string());

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        assert_eq!(worker.tick().await.unwrap(), 2);

        let failed = storage.enrichment_for(&bad.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("Generation failed: model crashed"));

        let ok = storage.enrichment_for(&good.id).unwrap().unwrap();
        assert_eq!(ok.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn transcription_with_enrichment_off_is_never_selected() {
        let storage = Arc::new(MemoryStorage::new());
        let mut t = done_transcription(&long_transcript());
        t.enrichment_requested = false;
        storage.insert_transcription(&t).unwrap();

        let mut model = MockLanguageModel::new();
        model.expect_generate().times(0);

        let mut worker = EnrichmentWorker::new(storage.clone(), Arc::new(model), settings());
        assert_eq!(worker.tick().await.unwrap(), 0);
        assert!(storage.enrichment_for(&t.id).unwrap().is_none());
    }
}
