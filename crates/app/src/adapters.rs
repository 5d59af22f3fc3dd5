//! Subprocess adapters for the two external models.
//!
//! Both the recognizer and the generator are opaque CLI tools holding
//! their own loaded models; VoxPipe only shells out and reads stdout.
//! Timeouts are imposed by the callers (decode pool, poll worker), not
//! here.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;
use voxpipe_enrich::{Generation, GenerationParams, LanguageModel, LlmError};
use voxpipe_foundation::SAMPLE_RATE_HZ;
use voxpipe_stt::{EngineOutput, SpeechEngine, SttError};

/// Speech engine that invokes an external recognizer once per segment,
/// handing it a temp WAV path and reading the transcript from stdout.
pub struct CommandSpeechEngine {
    command: String,
}

impl CommandSpeechEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn write_temp_wav(audio: &[i16]) -> Result<tempfile::TempPath, SttError> {
        let file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .map_err(|e| SttError::Engine(format!("temp wav: {e}")))?;
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE_HZ,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::new(file.as_file(), spec)
            .map_err(|e| SttError::Engine(format!("wav header: {e}")))?;
        for &sample in audio {
            writer
                .write_sample(sample)
                .map_err(|e| SttError::Engine(format!("wav body: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SttError::Engine(format!("wav finalize: {e}")))?;
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeechEngine {
    async fn transcribe(&self, audio: &[i16]) -> Result<EngineOutput, SttError> {
        let wav = Self::write_temp_wav(audio)?;
        let output = tokio::process::Command::new(&self.command)
            .arg(wav.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SttError::Engine(format!("spawn {}: {e}", self.command)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SttError::Engine(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(target: "adapter", "Recognizer returned {} chars", text.len());
        Ok(EngineOutput {
            text,
            language: None,
            confidence: 1.0,
        })
    }

    fn name(&self) -> &str {
        &self.command
    }
}

/// Language model adapter driving a llama.cpp style CLI. The prompt is
/// piped over stdin to avoid argv length limits on long transcripts.
pub struct CommandLanguageModel {
    command: String,
    model_path: PathBuf,
}

impl CommandLanguageModel {
    pub fn new(command: impl Into<String>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            model_path: model_path.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for CommandLanguageModel {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Generation, LlmError> {
        if !self.model_path.exists() {
            return Err(LlmError::ModelNotFound(
                self.model_path.display().to_string(),
            ));
        }

        let mut prompt_file = tempfile::NamedTempFile::new()
            .map_err(|e| LlmError::Backend(format!("prompt file: {e}")))?;
        prompt_file
            .write_all(prompt.as_bytes())
            .map_err(|e| LlmError::Backend(format!("prompt file: {e}")))?;

        let output = tokio::process::Command::new(&self.command)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(prompt_file.path())
            .args(["--temp", &params.temperature.to_string()])
            .args(["--top-p", &params.top_p.to_string()])
            .args(["--top-k", &params.top_k.to_string()])
            .args(["--repeat-penalty", &params.repeat_penalty.to_string()])
            .args(["-n", &params.max_tokens.to_string()])
            .arg("--no-display-prompt")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LlmError::Backend(format!("spawn {}: {e}", self.command)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Backend(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // The CLI does not report a token count; a whitespace estimate
        // is close enough for the provenance field.
        let tokens_generated = text.split_whitespace().count() as u64;
        Ok(Generation {
            text,
            tokens_generated,
        })
    }

    fn model_name(&self) -> String {
        self.model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.command.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_recognizer_command_surfaces_as_engine_error() {
        let engine = CommandSpeechEngine::new("definitely-not-a-real-recognizer");
        let err = engine.transcribe(&[0i16; 160]).await.unwrap_err();
        assert!(matches!(err, SttError::Engine(_)));
    }

    #[tokio::test]
    async fn missing_model_file_is_reported_before_spawning() {
        let model = CommandLanguageModel::new("llama-cli", "/nonexistent/model.gguf");
        let params = GenerationParams {
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            max_tokens: 10,
        };
        let err = model.generate("hi", &params).await.unwrap_err();
        assert!(matches!(err, LlmError::ModelNotFound(_)));
    }

    #[test]
    fn model_name_is_the_file_stem() {
        let model = CommandLanguageModel::new("llama-cli", "models/mistral-7b.Q4_K_M.gguf");
        assert_eq!(model.model_name(), "mistral-7b.Q4_K_M");
    }
}
