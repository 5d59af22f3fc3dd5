//! Application configuration.
//!
//! Settings are grouped into sections matching the TOML file layout.
//! Every section has full defaults so a missing or partial file still
//! yields a runnable configuration; environment variables prefixed with
//! `VOXPIPE_` override file values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub vad: VadSettings,
    pub limits: LimitsSettings,
    pub storage: StorageSettings,
    pub enrichment: EnrichmentSettings,
}

/// Speech engine and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// External recognizer command, invoked once per segment with a WAV
    /// path argument. `None` wires the null engine.
    pub command: Option<String>,
    /// Forced language code; `None` means auto-detect per job.
    pub language: Option<String>,
    /// Cap on concurrent decode calls per job.
    pub max_workers: usize,
    /// Upper bound on a merged segment span.
    pub segment_length_ms: u64,
    /// Per-call timeout for one segment decode.
    pub call_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: None,
            language: None,
            max_workers: 2,
            segment_length_ms: 60_000,
            call_timeout_secs: 120,
        }
    }
}

/// Voice activity detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub enabled: bool,
    /// A silence run at least this long splits raw speech intervals.
    pub min_silence_len_ms: u64,
    /// Frames quieter than this (dBFS) count as silence.
    pub silence_thresh_dbfs: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_silence_len_ms: 500,
            silence_thresh_dbfs: -40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSettings {
    pub max_file_size_mb: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            allowed_extensions: ["wav", "mp3", "m4a", "flac", "ogg", "webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "voxpipe.db".to_string(),
        }
    }
}

/// Enrichment worker, model, and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,

    /// External generation command (llama.cpp style CLI).
    pub llm_command: String,
    pub model_path: String,
    pub prompt_language: String,
    pub call_timeout_secs: u64,

    pub max_transcription_chars: usize,
    pub min_transcription_chars: usize,

    pub generate_title: bool,
    pub generate_summary: bool,
    pub generate_bullets: bool,
    pub generate_sentiment: bool,
    pub generate_topics: bool,

    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub max_tokens: u32,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 15,
            batch_size: 3,
            max_retries: 3,
            retry_delay_seconds: 60,
            llm_command: "llama-cli".to_string(),
            model_path: "models/mistral-7b-instruct-v0.3.Q4_K_M.gguf".to_string(),
            prompt_language: "fr".to_string(),
            call_timeout_secs: 300,
            max_transcription_chars: 15_000,
            min_transcription_chars: 100,
            generate_title: true,
            generate_summary: true,
            generate_bullets: true,
            generate_sentiment: true,
            generate_topics: false,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_tokens: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus `VOXPIPE_`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(p) => builder.add_source(config::File::from(p)),
            None => builder.add_source(config::File::with_name("voxpipe").required(false)),
        };
        let settings = builder
            .add_source(config::Environment::with_prefix("VOXPIPE").separator("__"))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    /// Validate the whole configuration, collecting every problem
    /// instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.max_workers == 0 {
            errors.push("engine.max_workers must be >= 1".to_string());
        }
        if self.engine.segment_length_ms == 0 {
            errors.push("engine.segment_length_ms must be > 0".to_string());
        }
        if self.vad.min_silence_len_ms == 0 {
            errors.push("vad.min_silence_len_ms must be > 0".to_string());
        }

        let e = &self.enrichment;
        if e.batch_size == 0 {
            errors.push("enrichment.batch_size must be >= 1".to_string());
        }
        if e.poll_interval_seconds == 0 {
            errors.push("enrichment.poll_interval_seconds must be >= 1".to_string());
        }
        if !(0.0..=2.0).contains(&e.temperature) {
            errors.push(format!(
                "enrichment.temperature must be 0-2: {}",
                e.temperature
            ));
        }
        if !(0.0..=1.0).contains(&e.top_p) {
            errors.push(format!("enrichment.top_p must be 0-1: {}", e.top_p));
        }
        if e.max_transcription_chars <= e.min_transcription_chars {
            errors.push(
                "enrichment.max_transcription_chars must be > min_transcription_chars".to_string(),
            );
        }
        if !(e.generate_title
            || e.generate_summary
            || e.generate_bullets
            || e.generate_sentiment
            || e.generate_topics)
        {
            errors.push("at least one enrichment.generate_* option must be enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.engine.segment_length_ms, 60_000);
        assert_eq!(cfg.enrichment.batch_size, 3);
        assert!(cfg.enrichment.generate_title);
        assert!(!cfg.enrichment.generate_topics);
    }

    #[test]
    fn validate_collects_all_errors() {
        let mut cfg = AppConfig::default();
        cfg.engine.max_workers = 0;
        cfg.enrichment.temperature = 5.0;
        cfg.enrichment.min_transcription_chars = 20_000;
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nmax_workers = 8\n\n[enrichment]\nbatch_size = 5"
        )
        .unwrap();
        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.engine.max_workers, 8);
        assert_eq!(cfg.engine.segment_length_ms, 60_000);
        assert_eq!(cfg.enrichment.batch_size, 5);
        assert_eq!(cfg.enrichment.max_retries, 3);
        assert!(cfg.vad.enabled);
    }
}
