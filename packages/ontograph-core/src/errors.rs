//! Error types for ontograph-core
//!
//! Provides unified error handling across the resolver, tracker and
//! graph synchronizer.

use ontograph_storage::{DictKind, StorageError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::extraction::CallError;
use crate::graph::GraphError;

/// Main error type for ontology operations
#[derive(Debug, Error)]
pub enum OntologyError {
    /// Relational store error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Uniqueness conflict that a re-lookup could not resolve
    #[error("Dedup conflict on {kind} '{term}' in category '{category}'")]
    DedupConflict {
        kind: DictKind,
        category: String,
        term: String,
    },

    /// LLM output does not match the extraction structure
    #[error("Malformed extraction payload: {0}")]
    MalformedPayload(String),

    /// Extraction backend failed after local retries
    #[error("Extraction call failed: {0}")]
    Call(#[from] CallError),

    /// Embedding backend failure
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Graph store failure
    #[error("Graph sync error: {0}")]
    Graph(#[from] GraphError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OntologyError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        OntologyError::MalformedPayload(msg.into())
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            OntologyError::Storage(e) => !matches!(
                e.kind,
                ontograph_storage::ErrorKind::NotFound | ontograph_storage::ErrorKind::Serialization
            ),
            OntologyError::DedupConflict { .. } => true,
            OntologyError::Call(e) => e.is_retryable(),
            OntologyError::Embedding(_) | OntologyError::Graph(_) => true,
            OntologyError::MalformedPayload(_) | OntologyError::Config(_) => false,
        }
    }
}

/// Result type alias for ontology operations
pub type Result<T> = std::result::Result<T, OntologyError>;
