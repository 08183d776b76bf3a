//! Ontograph storage: relational persistence for the ontology pipeline
//!
//! ## Tables
//!
//! - `object_dict` / `relation_dict`: canonical entries
//! - `object_synonyms` / `relation_synonyms`: alternate surface forms
//! - `fact`: subject-relation-object triples
//! - `object_reference` / `relation_reference` / `fact_reference`: provenance rows
//! - `document` / `document_chunk`: ingested text and per-chunk status
//! - `pipeline_execution`: pipeline runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ontograph_storage::{DictKind, OntologyStore, SqliteStore};
//!
//! let store = SqliteStore::open("ontograph.db")?;
//! let hit = store
//!     .find_entry_by_term_en(1, DictKind::Object, "ingredient", "VitaminC")
//!     .await?;
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    content_hash, ChunkId, ChunkStatus, DictKind, DictionaryEntry, Document, DocumentChunk,
    DocumentId, DocumentStore, EntryId, EntryStatus, EvidenceLevel, ExecutionId, ExecutionStatus,
    ExecutionStore, Fact, FactId, Language, NewChunk, NewDictionaryEntry, NewFact, NewSynonym,
    OntologySnapshot, OntologyStore, PipelineExecution, ReferenceKind, ReferenceRow, SweepReport,
    Synonym, WorkspaceId,
};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteStore;
