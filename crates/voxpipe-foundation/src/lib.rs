pub mod config;
pub mod error;

pub use config::{
    AppConfig, EngineSettings, EnrichmentSettings, LimitsSettings, StorageSettings, VadSettings,
};
pub use error::{AppError, AudioError};

/// Canonical sample rate every waveform is normalized to before
/// segmentation and decoding.
pub const SAMPLE_RATE_HZ: u32 = 16_000;
