//! Graph synchronizer against the in-memory graph store

use std::sync::Arc;

use async_trait::async_trait;
use ontograph_core::config::ResolverConfig;
use ontograph_core::extraction::{CallError, EmbeddingProvider, HashingEmbeddingProvider};
use ontograph_core::graph::{
    CollectionKind, GraphError, GraphLayout, GraphResult, GraphStore, GraphSynchronizer,
    ImportSummary, InMemoryGraphStore, SimilarityHit,
};
use ontograph_core::ontology::DictionaryResolver;
use ontograph_storage::{DictKind, EvidenceLevel, OntologyStore, ReferenceKind, SqliteStore};
use pretty_assertions::assert_eq;
use serde_json::Value;

/// Every component NaN
struct NanEmbedder;

#[async_trait]
impl EmbeddingProvider for NanEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f64>, CallError> {
        Ok(vec![f64::NAN; 4])
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Rejects every import into collections whose name ends with `suffix`
struct RejectingStore {
    inner: InMemoryGraphStore,
    suffix: &'static str,
}

#[async_trait]
impl GraphStore for RejectingStore {
    async fn collection_exists(&self, name: &str) -> GraphResult<bool> {
        self.inner.collection_exists(name).await
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> GraphResult<()> {
        self.inner.create_collection(name, kind).await
    }

    async fn drop_collection(&self, name: &str) -> GraphResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn graph_exists(&self, name: &str) -> GraphResult<bool> {
        self.inner.graph_exists(name).await
    }

    async fn create_graph(&self, layout: &GraphLayout) -> GraphResult<()> {
        self.inner.create_graph(layout).await
    }

    async fn drop_graph(&self, name: &str) -> GraphResult<()> {
        self.inner.drop_graph(name).await
    }

    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> GraphResult<()> {
        self.inner.ensure_index(collection, fields).await
    }

    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> GraphResult<ImportSummary> {
        if collection.ends_with(self.suffix) {
            return Err(GraphError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.inner.import_documents(collection, documents).await
    }

    async fn get_document(&self, collection: &str, key: &str) -> GraphResult<Option<Value>> {
        self.inner.get_document(collection, key).await
    }

    async fn count_documents(&self, collection: &str) -> GraphResult<usize> {
        self.inner.count_documents(collection).await
    }

    async fn search_similar(
        &self,
        collection: &str,
        vector: &[f64],
        limit: usize,
    ) -> GraphResult<Vec<SimilarityHit>> {
        self.inner.search_similar(collection, vector, limit).await
    }
}

/// Three objects, one relation, two facts, all referenced from document 1
async fn seed(store: &Arc<SqliteStore>) {
    let dyn_store: Arc<dyn OntologyStore> = store.clone();
    let resolver = DictionaryResolver::new(dyn_store, &ResolverConfig::default());

    let vitamin = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Vitamin C", "비타민C")
        .await
        .unwrap();
    let zinc = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Zinc", "아연")
        .await
        .unwrap();
    let immunity = resolver
        .find_or_create(1, DictKind::Object, "effect", "Immunity", "면역")
        .await
        .unwrap();
    let supports = resolver
        .find_or_create(1, DictKind::Relation, "effect", "supports", "돕다")
        .await
        .unwrap();

    for (subject, chunk) in [(vitamin, 10), (zinc, 11)] {
        let fact = resolver
            .find_or_create_fact(1, subject, supports, immunity, 0.9, EvidenceLevel::Explicit)
            .await
            .unwrap();
        store.insert_reference(ReferenceKind::Fact, fact, 1, chunk).await.unwrap();
        store.insert_reference(ReferenceKind::Object, subject, 1, chunk).await.unwrap();
    }
    store.insert_reference(ReferenceKind::Object, immunity, 1, 10).await.unwrap();
    store.insert_reference(ReferenceKind::Relation, supports, 1, 10).await.unwrap();
}

async fn seeded_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().expect("in-memory store"));
    seed(&store).await;
    store
}

#[tokio::test]
async fn test_sync_twice_produces_same_counts() {
    let store = seeded_store().await;
    let graph = Arc::new(InMemoryGraphStore::new());
    let sync = GraphSynchronizer::new(
        store,
        graph.clone(),
        Arc::new(HashingEmbeddingProvider::new(16)),
        "test",
        2,
        3,
    );
    let layout = sync.layout(1);

    let first = sync.sync_workspace(1, false).await.unwrap();
    assert!(first.is_complete());
    assert_eq!((first.objects, first.relations, first.facts), (3, 1, 2));
    // 3 objects -> 2 batches, 1 relation -> 1, 2 facts -> 1
    assert_eq!(first.batches, 4);
    assert_eq!(first.embedded, 6);

    let counts = |graph: Arc<InMemoryGraphStore>, layout: GraphLayout| async move {
        (
            graph.count_documents(&layout.objects).await.unwrap(),
            graph.count_documents(&layout.relations).await.unwrap(),
            graph.count_documents(&layout.facts).await.unwrap(),
        )
    };
    let before = counts(graph.clone(), layout.clone()).await;
    assert_eq!(before, (3, 1, 2));

    let second = sync.sync_workspace(1, false).await.unwrap();
    assert!(second.is_complete());
    assert_eq!(counts(graph.clone(), layout.clone()).await, before);

    assert!(graph.graph_exists(&layout.graph).await.unwrap());
    assert!(graph
        .indexes(&layout.objects)
        .contains(&vec!["category".to_string(), "term_en".to_string()]));
}

#[tokio::test]
async fn test_edges_connect_object_nodes_with_provenance() {
    let store = seeded_store().await;
    let graph = Arc::new(InMemoryGraphStore::new());
    let sync = GraphSynchronizer::new(
        store,
        graph.clone(),
        Arc::new(HashingEmbeddingProvider::new(8)),
        "test",
        50,
        2,
    );
    sync.sync_workspace(1, false).await.unwrap();
    let layout = sync.layout(1);

    let edge = graph
        .get_document(&layout.facts, "1")
        .await
        .unwrap()
        .expect("fact 1 edge");
    assert_eq!(edge["_from"], "test_ws1_objects/Vitamin_C_1");
    assert_eq!(edge["_to"], "test_ws1_objects/Immunity_3");
    assert_eq!(edge["relation_key"], "supports_1");
    assert_eq!(edge["document_ids"], serde_json::json!([1]));
    assert_eq!(edge["chunk_ids"], serde_json::json!([10]));

    let immunity = graph
        .get_document(&layout.objects, "Immunity_3")
        .await
        .unwrap()
        .expect("object node");
    assert_eq!(immunity["term_ko"], "면역");
    assert_eq!(immunity["chunk_ids"], serde_json::json!([10]));
}

#[tokio::test]
async fn test_nan_embedding_is_not_written() {
    let store = seeded_store().await;
    let graph = Arc::new(InMemoryGraphStore::new());
    let sync = GraphSynchronizer::new(store, graph.clone(), Arc::new(NanEmbedder), "test", 50, 2);

    let report = sync.sync_workspace(1, false).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.embedded, 0);
    assert_eq!(report.embedding_skipped, 6);

    let node = graph
        .get_document(&sync.layout(1).objects, "Vitamin_C_1")
        .await
        .unwrap()
        .expect("node upserted");
    assert!(node["embedding"].is_null());
    assert_eq!(node["term_en"], "Vitamin C");
    assert_eq!(node["category"], "ingredient");
    assert_eq!(node["summary"], "Vitamin C (비타민C)");
}

#[tokio::test]
async fn test_failed_batch_leaves_siblings_written() {
    let store = seeded_store().await;
    let graph = Arc::new(RejectingStore {
        inner: InMemoryGraphStore::new(),
        suffix: "_facts",
    });
    let sync = GraphSynchronizer::new(
        store,
        graph.clone(),
        Arc::new(HashingEmbeddingProvider::new(8)),
        "test",
        50,
        2,
    );

    let report = sync.sync_workspace(1, false).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.facts, 0);
    assert_eq!(report.objects, 3);
    assert_eq!(report.errors.len(), 1);

    let layout = sync.layout(1);
    assert_eq!(graph.count_documents(&layout.objects).await.unwrap(), 3);
    assert_eq!(graph.count_documents(&layout.facts).await.unwrap(), 0);
}

#[tokio::test]
async fn test_drop_existing_recreates_layout() {
    let store = seeded_store().await;
    let graph = Arc::new(InMemoryGraphStore::new());
    let sync = GraphSynchronizer::new(
        store,
        graph.clone(),
        Arc::new(HashingEmbeddingProvider::new(8)),
        "test",
        50,
        2,
    );
    let layout = sync.layout(1);

    sync.sync_workspace(1, false).await.unwrap();
    graph
        .import_documents(&layout.objects, &[serde_json::json!({"_key": "stale_99"})])
        .await
        .unwrap();
    assert_eq!(graph.count_documents(&layout.objects).await.unwrap(), 4);

    sync.sync_workspace(1, true).await.unwrap();
    assert_eq!(graph.count_documents(&layout.objects).await.unwrap(), 3);
}

#[tokio::test]
async fn test_search_nodes_ranks_closest_term_first() {
    let store = seeded_store().await;
    let graph = Arc::new(InMemoryGraphStore::new());
    let sync = GraphSynchronizer::new(
        store,
        graph,
        Arc::new(HashingEmbeddingProvider::new(64)),
        "test",
        50,
        2,
    );
    sync.sync_workspace(1, false).await.unwrap();

    let hits = sync.search_nodes(1, "Zinc (아연)", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].key, "Zinc_2");
}
