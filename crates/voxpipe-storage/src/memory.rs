//! In-memory storage backend.
//!
//! Same claim and transition semantics as the SQLite backend, with the
//! compare-and-set performed under a single write lock. Used by tests
//! and by the pipeline integration harness.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::types::{Enrichment, JobStatus, Transcription, TranscriptionFilter};
use crate::Storage;

#[derive(Default)]
pub struct MemoryStorage {
    transcriptions: RwLock<HashMap<String, Transcription>>,
    /// Keyed by transcription id; the one-to-one relation is structural.
    enrichments: RwLock<HashMap<String, Enrichment>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn insert_transcription(&self, t: &Transcription) -> Result<(), StorageError> {
        self.transcriptions.write().insert(t.id.clone(), t.clone());
        Ok(())
    }

    fn get_transcription(&self, id: &str) -> Result<Option<Transcription>, StorageError> {
        Ok(self.transcriptions.read().get(id).cloned())
    }

    fn list_transcriptions(
        &self,
        filter: &TranscriptionFilter,
    ) -> Result<Vec<Transcription>, StorageError> {
        let map = self.transcriptions.read();
        let mut rows: Vec<Transcription> = map
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter.text_contains.as_ref().map_or(true, |needle| {
                    t.text.as_ref().is_some_and(|text| text.contains(needle))
                })
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn claim_transcription(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut map = self.transcriptions.write();
        match map.get_mut(id) {
            Some(t) if t.status == JobStatus::Pending => {
                t.status = JobStatus::Processing;
                t.started_at = Some(started_at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound { id: id.to_string() }),
        }
    }

    fn finish_transcription(&self, t: &Transcription) -> Result<(), StorageError> {
        let mut map = self.transcriptions.write();
        match map.get_mut(&t.id) {
            Some(existing) if existing.status == JobStatus::Processing => {
                existing.status = t.status;
                existing.language = t.language.clone();
                existing.duration = t.duration;
                existing.processing_time = t.processing_time;
                existing.text = t.text.clone();
                existing.segments = t.segments.clone();
                existing.segments_count = t.segments_count;
                existing.vad_enabled = t.vad_enabled;
                existing.error_message = t.error_message.clone();
                existing.finished_at = t.finished_at;
                Ok(())
            }
            Some(_) => Err(StorageError::InvalidTransition { id: t.id.clone() }),
            None => Err(StorageError::NotFound { id: t.id.clone() }),
        }
    }

    fn set_enrichment_requested(&self, id: &str, requested: bool) -> Result<(), StorageError> {
        let mut map = self.transcriptions.write();
        match map.get_mut(id) {
            Some(t) => {
                t.enrichment_requested = requested;
                Ok(())
            }
            None => Err(StorageError::NotFound { id: id.to_string() }),
        }
    }

    fn enrichment_for(
        &self,
        transcription_id: &str,
    ) -> Result<Option<Enrichment>, StorageError> {
        Ok(self.enrichments.read().get(transcription_id).cloned())
    }

    fn create_enrichment_if_absent(
        &self,
        transcription_id: &str,
    ) -> Result<Enrichment, StorageError> {
        let mut map = self.enrichments.write();
        let e = map
            .entry(transcription_id.to_string())
            .or_insert_with(|| Enrichment::new_pending(transcription_id));
        Ok(e.clone())
    }

    fn claim_enrichment(
        &self,
        transcription_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Enrichment>, StorageError> {
        let mut map = self.enrichments.write();
        match map.get_mut(transcription_id) {
            Some(e) if e.status == JobStatus::Pending => {
                e.status = JobStatus::Processing;
                e.started_at = Some(started_at);
                Ok(Some(e.clone()))
            }
            _ => Ok(None),
        }
    }

    fn update_enrichment(&self, e: &Enrichment) -> Result<(), StorageError> {
        let mut map = self.enrichments.write();
        match map.get_mut(&e.transcription_id) {
            Some(existing) => {
                *existing = e.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound { id: e.id.clone() }),
        }
    }

    fn enrichment_candidates(
        &self,
        limit: usize,
        retry_cutoff: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<Transcription>, StorageError> {
        let transcriptions = self.transcriptions.read();
        let enrichments = self.enrichments.read();
        let mut rows: Vec<Transcription> = transcriptions
            .values()
            .filter(|t| t.status == JobStatus::Done && t.enrichment_requested)
            .filter(|t| match enrichments.get(&t.id) {
                None => true,
                Some(e) => {
                    e.status == JobStatus::Pending
                        && e.retry_count < max_retries
                        && e.started_at.map_or(true, |s| s <= retry_cutoff)
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
