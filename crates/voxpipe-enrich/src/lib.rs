//! Transcript enrichment: the local language model seam, prompt
//! construction, labeled-output parsing, and the poll worker that ties
//! them to storage.

pub mod llm;
pub mod parser;
pub mod prompt;
pub mod worker;

pub use llm::{Generation, GenerationParams, LanguageModel, LlmError};
pub use parser::{parse_response, ParseError, ParsedEnrichment};
pub use prompt::{truncate_transcript, PromptBuilder};
pub use worker::{EnrichmentWorker, WorkerStats};
