pub mod decoder;
pub mod waveform;

pub use decoder::AudioDecoder;
pub use waveform::Waveform;
