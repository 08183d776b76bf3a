//! Domain layer: records and storage ports
//!
//! # Domain Models
//!
//! - `DictionaryEntry` / `Synonym`: canonical object and relation terms
//! - `Fact`: subject-relation-object triple
//! - `ReferenceRow`: `(document, chunk)` provenance, basis for reference counting
//! - `Document` / `DocumentChunk`: ingested text and per-chunk status
//! - `PipelineExecution`: persisted pipeline run
//!
//! # Port Traits
//!
//! - `OntologyStore`, `DocumentStore`, `ExecutionStore`

pub mod models;
pub mod ports;

pub use models::*;
pub use ports::{DocumentStore, ExecutionStore, OntologyStore};
