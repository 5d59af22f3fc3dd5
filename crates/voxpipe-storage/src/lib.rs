//! Persistence layer: record types, the `Storage` trait, and its
//! SQLite and in-memory backends.
//!
//! The atomic claim operations (compare-and-set on status) are the only
//! cross-worker synchronization point in the system; every scheduler
//! relies on them for at-most-one-active-processor-per-job.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

use chrono::{DateTime, Utc};

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{
    Enrichment, JobStatus, Segment, Sentiment, Transcription, TranscriptionFilter,
};

pub trait Storage: Send + Sync {
    fn insert_transcription(&self, t: &Transcription) -> Result<(), StorageError>;
    fn get_transcription(&self, id: &str) -> Result<Option<Transcription>, StorageError>;
    fn list_transcriptions(
        &self,
        filter: &TranscriptionFilter,
    ) -> Result<Vec<Transcription>, StorageError>;

    /// Atomically claim a pending transcription for processing.
    ///
    /// Exactly one concurrent caller observes `true`; the claim sets
    /// `started_at` and moves status to `processing`.
    fn claim_transcription(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Write the terminal fields of a processed transcription.
    ///
    /// Only a `processing` row may be finished; anything else is an
    /// invalid transition (states never regress).
    fn finish_transcription(&self, t: &Transcription) -> Result<(), StorageError>;

    fn set_enrichment_requested(&self, id: &str, requested: bool) -> Result<(), StorageError>;

    fn enrichment_for(&self, transcription_id: &str)
        -> Result<Option<Enrichment>, StorageError>;

    /// Create the lazy one-to-one enrichment row, or return the
    /// existing one.
    fn create_enrichment_if_absent(
        &self,
        transcription_id: &str,
    ) -> Result<Enrichment, StorageError>;

    /// Atomically claim a pending enrichment row; returns the claimed
    /// row, or `None` when another worker holds it or it is terminal.
    fn claim_enrichment(
        &self,
        transcription_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Enrichment>, StorageError>;

    fn update_enrichment(&self, e: &Enrichment) -> Result<(), StorageError>;

    /// Batch selection for the poll worker: completed transcriptions
    /// with enrichment requested whose enrichment is absent, or pending
    /// with retry budget left and backoff elapsed (`started_at` at or
    /// before `retry_cutoff`).
    fn enrichment_candidates(
        &self,
        limit: usize,
        retry_cutoff: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<Transcription>, StorageError>;
}
