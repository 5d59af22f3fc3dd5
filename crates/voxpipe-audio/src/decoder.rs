//! Input normalization via an external decoder.
//!
//! Decoding and resampling are delegated to ffmpeg; this module only
//! drives the process and reads its canonical mono/16 kHz WAV output.
//! Any failure here is a job-level error, never retried.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use voxpipe_foundation::config::LimitsSettings;
use voxpipe_foundation::error::AudioError;
use voxpipe_foundation::SAMPLE_RATE_HZ;

use crate::waveform::Waveform;

const STDERR_TAIL_CHARS: usize = 400;

pub struct AudioDecoder {
    command: String,
    timeout: Duration,
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self {
            command: "ffmpeg".to_string(),
            timeout: Duration::from_secs(180),
        }
    }
}

impl AudioDecoder {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Normalize `input` to a mono 16 kHz waveform.
    pub async fn decode_to_waveform(&self, input: &Path) -> Result<Waveform, AudioError> {
        let scratch = tempfile::Builder::new()
            .prefix("voxpipe-decode-")
            .suffix(".wav")
            .tempfile()?;
        let out_path = scratch.path().to_path_buf();

        debug!(target: "audio", "Normalizing {:?} via {}", input, self.command);

        let run = Command::new(&self.command)
            .arg("-nostdin")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg(SAMPLE_RATE_HZ.to_string())
            .arg("-f")
            .arg("wav")
            .arg(&out_path)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                return Err(AudioError::DecodeTimeout {
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(AudioError::DecoderMissing {
                    command: self.command.clone(),
                })
            }
            Ok(Err(e)) => return Err(AudioError::Io(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut tail_start = stderr.len().saturating_sub(STDERR_TAIL_CHARS);
            while !stderr.is_char_boundary(tail_start) {
                tail_start += 1;
            }
            return Err(AudioError::DecodeFailed {
                status: output.status.code().unwrap_or(-1),
                stderr_tail: stderr[tail_start..].trim().to_string(),
            });
        }

        let waveform = read_wav(&out_path)?;
        info!(
            target: "audio",
            "Normalized {:?}: {:.2}s of mono audio at {} Hz",
            input.file_name().unwrap_or_default(),
            waveform.duration_secs(),
            SAMPLE_RATE_HZ
        );
        Ok(waveform)
    }
}

/// Read a mono 16-bit WAV produced by the decoder.
pub fn read_wav(path: &Path) -> Result<Waveform, AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    if samples.is_empty() {
        return Err(AudioError::EmptyAudio);
    }
    Ok(Waveform::new(samples))
}

/// Reject inputs the pipeline should not even hand to the decoder.
pub fn validate_input(path: &Path, limits: &LimitsSettings) -> Result<(), AudioError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !limits.allowed_extensions.iter().any(|e| *e == extension) {
        return Err(AudioError::UnsupportedExtension { extension });
    }

    let size_mb = std::fs::metadata(path)?.len() / (1024 * 1024);
    if size_mb > limits.max_file_size_mb {
        return Err(AudioError::FileTooLarge {
            size_mb,
            limit_mb: limits.max_file_size_mb,
        });
    }
    Ok(())
}
