use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio decoder not found: {command}")]
    DecoderMissing { command: String },

    #[error("Decode failed (exit {status}): {stderr_tail}")]
    DecodeFailed { status: i32, stderr_tail: String },

    #[error("Decoder timed out after {seconds}s")]
    DecodeTimeout { seconds: u64 },

    #[error("Decoded stream contains no samples")]
    EmptyAudio,

    #[error("Unsupported file extension: {extension:?}")]
    UnsupportedExtension { extension: String },

    #[error("File too large: {size_mb} MB (limit {limit_mb} MB)")]
    FileTooLarge { size_mb: u64, limit_mb: u64 },

    #[error("WAV read error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
