//! Storage Ports (Trait Interfaces)
//!
//! Port/Adapter split so the resolver, tracker, synchronizer and orchestrator
//! never see SQL:
//! - `OntologyStore`: dictionary, synonym, fact and reference tables
//! - `DocumentStore`: documents and per-chunk processing state
//! - `ExecutionStore`: `pipeline_execution` rows

use async_trait::async_trait;

use super::models::{
    ChunkId, ChunkStatus, DictKind, DictionaryEntry, Document, DocumentChunk, DocumentId, EntryId,
    ExecutionId, Fact, NewChunk, NewDictionaryEntry, NewFact, NewSynonym, OntologySnapshot,
    PipelineExecution, ReferenceKind, Synonym, WorkspaceId,
};
use crate::error::Result;

/// Relational ontology store
///
/// Inserts must fail with `ErrorKind::Conflict` on a uniqueness violation so
/// callers can resolve the race by re-reading.
#[async_trait]
pub trait OntologyStore: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Dictionary
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Exact match on the canonical English term
    async fn find_entry_by_term_en(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term: &str,
    ) -> Result<Option<DictionaryEntry>>;

    /// Exact match on the canonical local-language term
    async fn find_entry_by_term_ko(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term: &str,
    ) -> Result<Option<DictionaryEntry>>;

    /// Exact match on a synonym surface form
    async fn find_synonym(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        surface: &str,
    ) -> Result<Option<Synonym>>;

    async fn get_entry(&self, kind: DictKind, id: EntryId) -> Result<Option<DictionaryEntry>>;

    async fn insert_entry(&self, entry: &NewDictionaryEntry) -> Result<DictionaryEntry>;

    async fn insert_synonym(&self, synonym: &NewSynonym) -> Result<Synonym>;

    async fn list_synonyms(&self, kind: DictKind, target_id: EntryId) -> Result<Vec<Synonym>>;

    async fn count_entries(&self, workspace_id: WorkspaceId, kind: DictKind) -> Result<usize>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Facts
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn find_fact(
        &self,
        workspace_id: WorkspaceId,
        subject_id: EntryId,
        relation_id: EntryId,
        object_id: EntryId,
    ) -> Result<Option<Fact>>;

    async fn insert_fact(&self, fact: &NewFact) -> Result<Fact>;

    async fn count_facts(&self, workspace_id: WorkspaceId) -> Result<usize>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // References
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert `(target, document, chunk)` unless it already exists.
    ///
    /// Returns `true` when a row was added.
    async fn insert_reference(
        &self,
        kind: ReferenceKind,
        target_id: i64,
        document_id: DocumentId,
        chunk_id: ChunkId,
    ) -> Result<bool>;

    async fn count_references(&self, kind: ReferenceKind, target_id: i64) -> Result<usize>;

    /// Delete every reference row (all kinds) produced by `document_id`.
    ///
    /// A non-empty `chunk_ids` narrows the delete to those chunks. All kinds are
    /// removed in one transaction; returns the number of rows deleted.
    async fn delete_references_by_document(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
    ) -> Result<usize>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Orphan sweep (callers run these in this order)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Delete facts with zero reference rows
    async fn delete_orphan_facts(&self) -> Result<usize>;

    /// Delete synonyms whose target has zero references and no surviving fact
    async fn delete_synonyms_of_orphan_entries(&self, kind: DictKind) -> Result<usize>;

    /// Delete entries with zero references that no surviving fact uses
    async fn delete_orphan_entries(&self, kind: DictKind) -> Result<usize>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Snapshot
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Read all ontology rows of a workspace in one short read transaction
    async fn snapshot_workspace(&self, workspace_id: WorkspaceId) -> Result<OntologySnapshot>;
}

/// Documents and per-chunk processing state
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        workspace_id: WorkspaceId,
        title: &str,
        content: &str,
    ) -> Result<Document>;

    async fn get_document(&self, document_id: DocumentId) -> Result<Option<Document>>;

    async fn save_parsed_content(&self, document_id: DocumentId, parsed: &str) -> Result<()>;

    /// Replace all chunks of a document; returns the stored chunks in `seq` order
    async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<DocumentChunk>>;

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<DocumentChunk>>;

    async fn update_chunk_extraction(
        &self,
        chunk_id: ChunkId,
        status: ChunkStatus,
        payload: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn update_chunk_ontology(
        &self,
        chunk_id: ChunkId,
        status: ChunkStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn save_chunk_embedding(&self, chunk_id: ChunkId, embedding: &[f64]) -> Result<()>;
}

/// `pipeline_execution` persistence
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert and return the record with its assigned id
    async fn create_execution(&self, execution: &PipelineExecution) -> Result<PipelineExecution>;

    async fn update_execution(&self, execution: &PipelineExecution) -> Result<()>;

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<PipelineExecution>>;

    async fn latest_execution_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<PipelineExecution>>;
}
