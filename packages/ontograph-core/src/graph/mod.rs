//! Property-graph projection of the ontology

pub mod arango_store;
pub mod memory_store;
pub mod model;
pub mod ports;
pub mod sync;

use std::sync::Arc;

pub use arango_store::ArangoGraphStore;
pub use memory_store::InMemoryGraphStore;
pub use model::{
    cosine_similarity, edge_key, node_key, sanitize_key, EdgeDocument, GraphLayout, NodeDocument,
    MAX_KEY_BYTES,
};
pub use ports::{CollectionKind, GraphError, GraphResult, GraphStore, ImportSummary, SimilarityHit};
pub use sync::{GraphSynchronizer, SyncReport};

use crate::config::GraphConfig;

/// ArangoDB when `graph.url` is set, in-memory otherwise
pub fn graph_store_from_config(config: &GraphConfig) -> crate::Result<Arc<dyn GraphStore>> {
    match config.url {
        Some(_) => Ok(Arc::new(ArangoGraphStore::from_config(config)?)),
        None => Ok(Arc::new(InMemoryGraphStore::new())),
    }
}
