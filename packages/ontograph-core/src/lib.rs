/*
 * Ontograph Core - Ontology Deduplication & Graph Projection
 *
 * Layout:
 * - config/     : Versioned YAML configuration
 * - extraction/ : LLM extraction caller, payload parser, embedding providers
 * - ontology/   : Dictionary resolver, reference tracking, chunk ingest
 * - graph/      : Graph store port, ArangoDB/in-memory adapters, synchronizer
 *
 * Concurrency:
 * - Dictionary writes serialized per (workspace, kind, category) stripe
 * - Orphan sweeps exclusive against in-flight ingest
 * - Graph sync batches on a bounded worker pool
 */

#![allow(clippy::too_many_arguments)] // Resolver/ingest entry points take the full term tuple

pub mod config;
pub mod errors;
pub mod extraction;
pub mod graph;
pub mod ontology;

pub use config::{ConfigError, OntographConfig};
pub use errors::{OntologyError, Result};
pub use extraction::{EmbeddingProvider, ExtractionCaller, ExtractionPayload, RetryPolicy};
pub use graph::{graph_store_from_config, GraphStore, GraphSynchronizer, SyncReport};
pub use ontology::{DictionaryResolver, IngestReport, OntologyIngestor, ReferenceTracker};
