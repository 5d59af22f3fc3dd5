//! Speech-to-text layer: the engine abstraction, the bounded decode
//! pool, and the job runner that drives a transcription through its
//! state machine.

pub mod engine;
pub mod job;
pub mod pool;

pub use engine::{EngineOutput, NullEngine, SpeechEngine, SttError};
pub use job::{JobError, JobRunner};
pub use pool::{DecodePool, PoolOutcome};
