//! Domain records for the ontology, document and execution tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StorageError};

pub type WorkspaceId = i64;
pub type DocumentId = i64;
pub type ChunkId = i64;
pub type EntryId = i64;
pub type FactId = i64;
pub type ExecutionId = i64;

// ═══════════════════════════════════════════════════════════════════════════
// Dictionary
// ═══════════════════════════════════════════════════════════════════════════

/// Which dictionary table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictKind {
    Object,
    Relation,
}

impl DictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DictKind::Object => "object",
            DictKind::Relation => "relation",
        }
    }

    pub(crate) fn dict_table(&self) -> &'static str {
        match self {
            DictKind::Object => "object_dict",
            DictKind::Relation => "relation_dict",
        }
    }

    pub(crate) fn synonym_table(&self) -> &'static str {
        match self {
            DictKind::Object => "object_synonyms",
            DictKind::Relation => "relation_synonyms",
        }
    }

    pub fn reference_kind(&self) -> ReferenceKind {
        match self {
            DictKind::Object => ReferenceKind::Object,
            DictKind::Relation => ReferenceKind::Relation,
        }
    }
}

impl std::fmt::Display for DictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a canonical entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Active,
    Deprecated,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "ACTIVE",
            EntryStatus::Deprecated => "DEPRECATED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(EntryStatus::Active),
            "DEPRECATED" => Ok(EntryStatus::Deprecated),
            other => Err(StorageError::serialization(format!(
                "Invalid entry status: {}",
                other
            ))),
        }
    }
}

/// Surface-form language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ko,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ko => "ko",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Language::En),
            "ko" => Ok(Language::Ko),
            other => Err(StorageError::serialization(format!(
                "Invalid language: {}",
                other
            ))),
        }
    }
}

/// Canonical dictionary entry (object or relation variant)
///
/// Unique per (workspace, category, term_en) and per (workspace, category, term_ko).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub id: EntryId,
    pub workspace_id: WorkspaceId,
    pub kind: DictKind,
    pub category: String,
    pub term_en: String,
    pub term_ko: String,
    pub description: Option<String>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a canonical entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewDictionaryEntry {
    pub workspace_id: WorkspaceId,
    pub kind: DictKind,
    pub category: String,
    pub term_en: String,
    pub term_ko: String,
    pub description: Option<String>,
}

/// Alternate surface form pointing at a canonical entry
///
/// Unique per (workspace, category, synonym) within its dictionary kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synonym {
    pub id: i64,
    pub workspace_id: WorkspaceId,
    pub kind: DictKind,
    pub category: String,
    pub synonym: String,
    pub target_id: EntryId,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSynonym {
    pub workspace_id: WorkspaceId,
    pub kind: DictKind,
    pub category: String,
    pub synonym: String,
    pub target_id: EntryId,
    pub language: Language,
}

// ═══════════════════════════════════════════════════════════════════════════
// Facts
// ═══════════════════════════════════════════════════════════════════════════

/// How directly the source text supports a fact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceLevel {
    Explicit,
    #[default]
    Implied,
    Inferred,
}

impl EvidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceLevel::Explicit => "EXPLICIT",
            EvidenceLevel::Implied => "IMPLIED",
            EvidenceLevel::Inferred => "INFERRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXPLICIT" => Ok(EvidenceLevel::Explicit),
            "IMPLIED" => Ok(EvidenceLevel::Implied),
            "INFERRED" => Ok(EvidenceLevel::Inferred),
            other => Err(StorageError::serialization(format!(
                "Invalid evidence level: {}",
                other
            ))),
        }
    }
}

/// Subject-relation-object triple, unique per (workspace, subject, relation, object)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub workspace_id: WorkspaceId,
    pub subject_id: EntryId,
    pub relation_id: EntryId,
    pub object_id: EntryId,
    pub confidence: f64,
    pub evidence_level: EvidenceLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFact {
    pub workspace_id: WorkspaceId,
    pub subject_id: EntryId,
    pub relation_id: EntryId,
    pub object_id: EntryId,
    pub confidence: f64,
    pub evidence_level: EvidenceLevel,
}

// ═══════════════════════════════════════════════════════════════════════════
// References
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Object,
    Relation,
    Fact,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 3] = [
        ReferenceKind::Object,
        ReferenceKind::Relation,
        ReferenceKind::Fact,
    ];

    pub(crate) fn table(&self) -> &'static str {
        match self {
            ReferenceKind::Object => "object_reference",
            ReferenceKind::Relation => "relation_reference",
            ReferenceKind::Fact => "fact_reference",
        }
    }
}

/// Provenance row: `(document, chunk)` produced `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub kind: ReferenceKind,
    pub target_id: i64,
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
}

/// Everything the graph synchronizer needs for one workspace, read in one go.
#[derive(Debug, Clone, Default)]
pub struct OntologySnapshot {
    pub objects: Vec<DictionaryEntry>,
    pub relations: Vec<DictionaryEntry>,
    pub facts: Vec<Fact>,
    pub references: Vec<ReferenceRow>,
}

/// Row counts removed by one orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub facts: usize,
    pub object_synonyms: usize,
    pub relation_synonyms: usize,
    pub objects: usize,
    pub relations: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.facts + self.object_synonyms + self.relation_synonyms + self.objects + self.relations
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Documents & chunks
// ═══════════════════════════════════════════════════════════════════════════

/// Source document (upload and text extraction happen upstream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub content: String,
    pub parsed_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-chunk processing status (extraction and ontology are tracked separately)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "PENDING",
            ChunkStatus::Processing => "PROCESSING",
            ChunkStatus::Completed => "COMPLETED",
            ChunkStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ChunkStatus::Pending),
            "PROCESSING" => Ok(ChunkStatus::Processing),
            "COMPLETED" => Ok(ChunkStatus::Completed),
            "FAILED" => Ok(ChunkStatus::Failed),
            other => Err(StorageError::serialization(format!(
                "Invalid chunk status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub workspace_id: WorkspaceId,
    /// Position within the document (0-based)
    pub seq: u32,
    pub content: String,
    pub content_hash: String,
    pub extraction_status: ChunkStatus,
    /// Raw, already validated LLM payload
    pub extraction_payload: Option<String>,
    pub ontology_status: ChunkStatus,
    pub embedding: Option<Vec<f64>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Chunk content before it is assigned an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub seq: u32,
    pub content: String,
}

impl NewChunk {
    pub fn new(seq: u32, content: impl Into<String>) -> Self {
        Self {
            seq,
            content: content.into(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

/// Hex SHA-256 of chunk text
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Pipeline executions
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Processing => "PROCESSING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "PROCESSING" => Ok(ExecutionStatus::Processing),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            other => Err(StorageError::serialization(format!(
                "Invalid execution status: {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted pipeline run (`pipeline_execution` row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// 0 until the store assigns an id
    pub id: ExecutionId,
    pub workspace_id: WorkspaceId,
    pub document_id: DocumentId,
    pub status: ExecutionStatus,
    pub current_stage: Option<String>,
    /// 0-100
    pub progress: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PipelineExecution {
    pub fn pending(workspace_id: WorkspaceId, document_id: DocumentId) -> Self {
        Self {
            id: 0,
            workspace_id,
            document_id,
            status: ExecutionStatus::Pending,
            current_stage: None,
            progress: 0,
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }
}
