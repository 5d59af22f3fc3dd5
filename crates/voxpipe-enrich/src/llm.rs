//! The local language model seam.
//!
//! One loaded model serves the whole process; it is not safely
//! reentrant, so callers must serialize generations. The trait keeps
//! the worker testable against a mock.

use async_trait::async_trait;
use thiserror::Error;
use voxpipe_foundation::EnrichmentSettings;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),
    #[error("Generation timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("Generation failed: {0}")]
    Backend(String),
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub max_tokens: u32,
}

impl From<&EnrichmentSettings> for GenerationParams {
    fn from(s: &EnrichmentSettings) -> Self {
        Self {
            temperature: s.temperature,
            top_p: s.top_p,
            top_k: s.top_k,
            repeat_penalty: s.repeat_penalty,
            max_tokens: s.max_tokens,
        }
    }
}

/// Raw output of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub tokens_generated: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one generation. Calls must never overlap on the same model.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, LlmError>;

    /// Identifier persisted as `model_used` on completed enrichments.
    fn model_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxpipe_foundation::EnrichmentSettings;

    #[test]
    fn params_mirror_settings() {
        let settings = EnrichmentSettings::default();
        let params = GenerationParams::from(&settings);
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.top_k, 40);
        assert_eq!(params.max_tokens, 500);
    }
}
