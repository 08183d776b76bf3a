/*
 * Ontograph Orchestration - Document Ingestion Pipeline
 *
 * Runs the ingestion stages for one document at a time:
 *
 *   PARSE → CHUNK → {LLM_PROCESS ∥ VECTORIZE} → EXTRACT_ONTOLOGY → GRAPH_SYNC
 *
 * Architecture:
 * - Stage DAG with a topological plan of parallel groups
 * - Execution state machine persisted at every group boundary
 * - Reduce-after-fork context (immutable snapshots, merged after join)
 * - Pipeline events over a broadcast channel
 * - Cancellation and per-stage timeouts
 */

// Public modules
pub mod dag;
pub mod error;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod stages;

// Re-exports
pub use dag::{PipelineDAG, StageNode};
pub use error::{ErrorCategory, OrchestratorError, Result, StageFailure};
pub use events::{EventBus, PipelineEvent};
pub use job::{ExecutionStateMachine, StageId};
pub use orchestrator::Orchestrator;
pub use pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};
pub use runtime::{resync_after_removal, Backends, Runtime};
pub use stages::{
    ChunkStage, ExtractOntologyStage, GraphSyncStage, LlmProcessStage, ParseStage, VectorizeStage,
};
