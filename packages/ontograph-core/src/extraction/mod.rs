//! LLM extraction and embedding backends
//!
//! Both backends share one [`RetryPolicy`]: bounded wait per attempt, a small
//! retry budget, linear backoff. Exhausting it is a permanent failure for the
//! calling unit.

pub mod caller;
pub mod embedding;
pub mod payload;
pub mod retry;

pub use caller::{
    CallError, ExtractionCaller, HttpExtractionCaller, PromptRegistry, PromptTemplate,
    ONTOLOGY_EXTRACTION_PROMPT,
};
pub use embedding::{
    is_finite_vector, provider_from_config, EmbeddingProvider, HashingEmbeddingProvider,
    HttpEmbeddingProvider,
};
pub use payload::{ExtractedTerm, ExtractedTriple, ExtractionPayload};
pub use retry::RetryPolicy;
