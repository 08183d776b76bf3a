//! Built-in stage units, one per [`StageId`](crate::job::StageId)

mod chunk_stage;
mod graph_sync_stage;
mod llm_stage;
mod ontology_stage;
mod parse_stage;
mod vector_stage;

pub use chunk_stage::{split_text, ChunkStage};
pub use graph_sync_stage::GraphSyncStage;
pub use llm_stage::LlmProcessStage;
pub use ontology_stage::ExtractOntologyStage;
pub use parse_stage::{normalize_text, ParseStage};
pub use vector_stage::VectorizeStage;
