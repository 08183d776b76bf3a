//! Ontology deduplication: resolver, reference tracking, chunk ingest

pub mod ingest;
pub mod normalize;
pub mod reference;
pub mod resolver;

pub use ingest::{IngestReport, OntologyIngestor};
pub use normalize::{strip_whitespace, NormalizedTerms};
pub use reference::{ReferenceTracker, RemovalReport};
pub use resolver::{DictionaryResolver, Resolution};
