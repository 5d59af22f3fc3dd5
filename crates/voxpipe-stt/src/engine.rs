//! The speech engine seam.
//!
//! Everything above this trait treats recognition as an opaque async
//! call on a mono 16 kHz sample slice; concrete engines (and test
//! fakes) plug in behind it.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SttError {
    #[error("Engine call timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("Engine failure: {0}")]
    Engine(String),
    #[error("All {count} segment decodes failed")]
    AllSegmentsFailed { count: usize },
}

/// Result of one engine call over a single segment span.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub text: String,
    /// Detected language code, when the engine reports one.
    pub language: Option<String>,
    pub confidence: f32,
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one span of mono 16 kHz samples.
    async fn transcribe(&self, audio: &[i16]) -> Result<EngineOutput, SttError>;

    /// Identifier recorded alongside results, for diagnostics.
    fn name(&self) -> &str;
}

/// Engine stub that recognizes nothing.
///
/// Stands in when no real engine is configured; every span yields an
/// empty transcript with zero confidence.
#[derive(Debug, Default)]
pub struct NullEngine;

#[async_trait]
impl SpeechEngine for NullEngine {
    async fn transcribe(&self, audio: &[i16]) -> Result<EngineOutput, SttError> {
        debug!(target: "stt", "NullEngine dropping {} samples", audio.len());
        Ok(EngineOutput::default())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_engine_returns_empty_output() {
        let out = NullEngine.transcribe(&[0i16; 160]).await.unwrap();
        assert!(out.text.is_empty());
        assert!(out.language.is_none());
        assert_eq!(out.confidence, 0.0);
    }
}
