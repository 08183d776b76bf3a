//! Graph store port
//!
//! Document/edge collections addressed by `_key`, a named graph tying them
//! together, batched upsert-on-duplicate import, and vector similarity search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::model::GraphLayout;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph transport error: {0}")]
    Transport(String),

    #[error("Graph API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Import into '{collection}' rejected {errors} of {total} documents")]
    Import {
        collection: String,
        errors: usize,
        total: usize,
    },

    #[error("Graph serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        GraphError::Transport(err.to_string())
    }
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    Document,
    Edge,
}

/// Per-import counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub key: String,
    pub score: f64,
    pub document: Value,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> GraphResult<bool>;

    /// Create a collection; creating an existing one is not an error
    async fn create_collection(&self, name: &str, kind: CollectionKind) -> GraphResult<()>;

    /// Drop a collection; dropping a missing one is not an error
    async fn drop_collection(&self, name: &str) -> GraphResult<()>;

    async fn graph_exists(&self, name: &str) -> GraphResult<bool>;

    /// Named graph: `facts` edges between `objects`, `relations` as orphan vertices
    async fn create_graph(&self, layout: &GraphLayout) -> GraphResult<()>;

    async fn drop_graph(&self, name: &str) -> GraphResult<()>;

    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> GraphResult<()>;

    /// Upsert by `_key`: existing documents are updated field-by-field
    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> GraphResult<ImportSummary>;

    async fn get_document(&self, collection: &str, key: &str) -> GraphResult<Option<Value>>;

    async fn count_documents(&self, collection: &str) -> GraphResult<usize>;

    /// Top `limit` documents by cosine similarity of their `embedding` field
    async fn search_similar(
        &self,
        collection: &str,
        vector: &[f64],
        limit: usize,
    ) -> GraphResult<Vec<SimilarityHit>>;
}
