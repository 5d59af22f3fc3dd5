//! SQLite-backed storage.
//!
//! Connections are opened per operation; every call is short. Claims
//! are compare-and-set UPDATEs checked via the affected row count,
//! which SQLite serializes, so concurrent claimers see exactly one
//! winner.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StorageError;
use crate::types::{Enrichment, JobStatus, Transcription, TranscriptionFilter};
use crate::Storage;

pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Open or create the database and ensure the schema exists.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let this = Self {
            db_path: db_path.into(),
        };
        this.init()?;
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transcriptions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                language TEXT NULL,
                duration REAL NULL,
                processing_time REAL NULL,
                text TEXT NULL,
                segments TEXT NULL,
                segments_count INTEGER NOT NULL DEFAULT 0,
                vad_enabled INTEGER NOT NULL DEFAULT 0,
                enrichment_requested INTEGER NOT NULL DEFAULT 1,
                error_message TEXT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT NULL,
                finished_at TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transcriptions_status ON transcriptions(status);

            CREATE TABLE IF NOT EXISTS enrichments (
                id TEXT PRIMARY KEY,
                transcription_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                title TEXT NULL,
                summary TEXT NULL,
                bullets TEXT NULL,
                sentiment TEXT NULL,
                sentiment_confidence REAL NULL,
                topics TEXT NULL,
                model_used TEXT NULL,
                generation_time REAL NULL,
                tokens_generated INTEGER NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT NULL,
                finished_at TEXT NULL,
                FOREIGN KEY(transcription_id) REFERENCES transcriptions(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_enrichments_status ON enrichments(status);
            "#,
        )?;
        Ok(())
    }
}

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn opt_ts_to_sql(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(ts_to_sql)
}

fn sql_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| sql_err(idx, e))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, s)).transpose()
}

fn parse_status(idx: usize, s: String) -> rusqlite::Result<JobStatus> {
    s.parse().map_err(|e: String| {
        sql_err(idx, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

const TRANSCRIPTION_COLUMNS: &str = "id, status, language, duration, processing_time, text, \
     segments, segments_count, vad_enabled, enrichment_requested, error_message, \
     created_at, started_at, finished_at";

fn row_to_transcription(row: &Row<'_>) -> rusqlite::Result<Transcription> {
    let segments_json: Option<String> = row.get(6)?;
    let segments = match segments_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| sql_err(6, e))?,
        None => Vec::new(),
    };
    Ok(Transcription {
        id: row.get(0)?,
        status: parse_status(1, row.get(1)?)?,
        language: row.get(2)?,
        duration: row.get(3)?,
        processing_time: row.get(4)?,
        text: row.get(5)?,
        segments,
        segments_count: row.get::<_, i64>(7)? as usize,
        vad_enabled: row.get::<_, i64>(8)? != 0,
        enrichment_requested: row.get::<_, i64>(9)? != 0,
        error_message: row.get(10)?,
        created_at: parse_ts(11, row.get(11)?)?,
        started_at: parse_opt_ts(12, row.get(12)?)?,
        finished_at: parse_opt_ts(13, row.get(13)?)?,
    })
}

const ENRICHMENT_COLUMNS: &str = "id, transcription_id, status, title, summary, bullets, \
     sentiment, sentiment_confidence, topics, model_used, generation_time, tokens_generated, \
     retry_count, last_error, created_at, started_at, finished_at";

fn row_to_enrichment(row: &Row<'_>) -> rusqlite::Result<Enrichment> {
    let bullets_json: Option<String> = row.get(5)?;
    let bullets = match bullets_json {
        Some(json) => serde_json::from_str(&json).map_err(|e| sql_err(5, e))?,
        None => Vec::new(),
    };
    let sentiment: Option<String> = row.get(6)?;
    let sentiment = sentiment
        .map(|s| {
            s.parse().map_err(|e: String| {
                sql_err(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })
        })
        .transpose()?;
    let topics_json: Option<String> = row.get(8)?;
    let topics = topics_json
        .map(|json| serde_json::from_str(&json).map_err(|e| sql_err(8, e)))
        .transpose()?;
    Ok(Enrichment {
        id: row.get(0)?,
        transcription_id: row.get(1)?,
        status: parse_status(2, row.get(2)?)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        bullets,
        sentiment,
        sentiment_confidence: row.get(7)?,
        topics,
        model_used: row.get(9)?,
        generation_time: row.get(10)?,
        tokens_generated: row.get::<_, Option<i64>>(11)?.map(|n| n as u64),
        retry_count: row.get::<_, i64>(12)? as u32,
        last_error: row.get(13)?,
        created_at: parse_ts(14, row.get(14)?)?,
        started_at: parse_opt_ts(15, row.get(15)?)?,
        finished_at: parse_opt_ts(16, row.get(16)?)?,
    })
}

impl Storage for SqliteStorage {
    fn insert_transcription(&self, t: &Transcription) -> Result<(), StorageError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO transcriptions (id, status, language, duration, processing_time, text, \
             segments, segments_count, vad_enabled, enrichment_requested, error_message, \
             created_at, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                t.id,
                t.status.as_str(),
                t.language,
                t.duration,
                t.processing_time,
                t.text,
                serde_json::to_string(&t.segments)?,
                t.segments_count as i64,
                t.vad_enabled as i64,
                t.enrichment_requested as i64,
                t.error_message,
                ts_to_sql(&t.created_at),
                opt_ts_to_sql(&t.started_at),
                opt_ts_to_sql(&t.finished_at),
            ],
        )?;
        Ok(())
    }

    fn get_transcription(&self, id: &str) -> Result<Option<Transcription>, StorageError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {TRANSCRIPTION_COLUMNS} FROM transcriptions WHERE id = ?1"),
                params![id],
                row_to_transcription,
            )
            .optional()?;
        Ok(row)
    }

    fn list_transcriptions(
        &self,
        filter: &TranscriptionFilter,
    ) -> Result<Vec<Transcription>, StorageError> {
        let conn = self.open()?;
        let mut sql = format!(
            "SELECT {TRANSCRIPTION_COLUMNS} FROM transcriptions WHERE 1=1"
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(needle) = &filter.text_contains {
            sql.push_str(" AND text LIKE '%' || ? || '%'");
            args.push(Box::new(needle.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_transcription,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn claim_transcription(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE transcriptions SET status = 'processing', started_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
            params![ts_to_sql(&started_at), id],
        )?;
        Ok(changed == 1)
    }

    fn finish_transcription(&self, t: &Transcription) -> Result<(), StorageError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE transcriptions SET status = ?1, language = ?2, duration = ?3, \
             processing_time = ?4, text = ?5, segments = ?6, segments_count = ?7, \
             vad_enabled = ?8, error_message = ?9, finished_at = ?10 \
             WHERE id = ?11 AND status = 'processing'",
            params![
                t.status.as_str(),
                t.language,
                t.duration,
                t.processing_time,
                t.text,
                serde_json::to_string(&t.segments)?,
                t.segments_count as i64,
                t.vad_enabled as i64,
                t.error_message,
                opt_ts_to_sql(&t.finished_at),
                t.id,
            ],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(StorageError::InvalidTransition { id: t.id.clone() })
        }
    }

    fn set_enrichment_requested(&self, id: &str, requested: bool) -> Result<(), StorageError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE transcriptions SET enrichment_requested = ?1 WHERE id = ?2",
            params![requested as i64, id],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(StorageError::NotFound { id: id.to_string() })
        }
    }

    fn enrichment_for(
        &self,
        transcription_id: &str,
    ) -> Result<Option<Enrichment>, StorageError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {ENRICHMENT_COLUMNS} FROM enrichments WHERE transcription_id = ?1"
                ),
                params![transcription_id],
                row_to_enrichment,
            )
            .optional()?;
        Ok(row)
    }

    fn create_enrichment_if_absent(
        &self,
        transcription_id: &str,
    ) -> Result<Enrichment, StorageError> {
        let fresh = Enrichment::new_pending(transcription_id);
        let conn = self.open()?;
        conn.execute(
            "INSERT OR IGNORE INTO enrichments \
             (id, transcription_id, status, bullets, retry_count, created_at) \
             VALUES (?1, ?2, 'pending', '[]', 0, ?3)",
            params![fresh.id, transcription_id, ts_to_sql(&fresh.created_at)],
        )?;
        self.enrichment_for(transcription_id)?
            .ok_or_else(|| StorageError::NotFound {
                id: transcription_id.to_string(),
            })
    }

    fn claim_enrichment(
        &self,
        transcription_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Enrichment>, StorageError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE enrichments SET status = 'processing', started_at = ?1 \
             WHERE transcription_id = ?2 AND status = 'pending'",
            params![ts_to_sql(&started_at), transcription_id],
        )?;
        if changed == 1 {
            drop(conn);
            self.enrichment_for(transcription_id)
        } else {
            Ok(None)
        }
    }

    fn update_enrichment(&self, e: &Enrichment) -> Result<(), StorageError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE enrichments SET status = ?1, title = ?2, summary = ?3, bullets = ?4, \
             sentiment = ?5, sentiment_confidence = ?6, topics = ?7, model_used = ?8, \
             generation_time = ?9, tokens_generated = ?10, retry_count = ?11, \
             last_error = ?12, started_at = ?13, finished_at = ?14 WHERE id = ?15",
            params![
                e.status.as_str(),
                e.title,
                e.summary,
                serde_json::to_string(&e.bullets)?,
                e.sentiment.map(|s| s.as_str().to_string()),
                e.sentiment_confidence,
                e.topics.as_ref().map(serde_json::to_string).transpose()?,
                e.model_used,
                e.generation_time,
                e.tokens_generated.map(|n| n as i64),
                e.retry_count as i64,
                e.last_error,
                opt_ts_to_sql(&e.started_at),
                opt_ts_to_sql(&e.finished_at),
                e.id,
            ],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(StorageError::NotFound { id: e.id.clone() })
        }
    }

    fn enrichment_candidates(
        &self,
        limit: usize,
        retry_cutoff: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<Vec<Transcription>, StorageError> {
        let conn = self.open()?;
        // RFC 3339 UTC strings compare chronologically as text.
        let sql = format!(
            "SELECT {} FROM transcriptions t \
             LEFT JOIN enrichments e ON e.transcription_id = t.id \
             WHERE t.status = 'done' AND t.enrichment_requested = 1 \
               AND (e.id IS NULL OR (e.status = 'pending' AND e.retry_count < ?1 \
                    AND (e.started_at IS NULL OR e.started_at <= ?2))) \
             ORDER BY t.finished_at DESC LIMIT ?3",
            TRANSCRIPTION_COLUMNS
                .split(", ")
                .map(|c| format!("t.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![max_retries as i64, ts_to_sql(&retry_cutoff), limit as i64],
                row_to_transcription,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
