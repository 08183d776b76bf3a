//! Graph synchronizer
//!
//! Projects one workspace's relational ontology into the graph store:
//!
//! 1. snapshot dictionary, fact and reference rows in one read
//! 2. ensure collections, named graph and indexes (optionally dropping first)
//! 3. upsert object nodes, relation nodes and fact edges in fixed-size batches
//!    that run concurrently on a bounded worker pool
//!
//! Keys are derived from dictionary/fact ids, so re-running a sync is an
//! upsert of the same documents. A row whose embedding fails or is not finite
//! is written with a null vector; an import failure fails only its own batch.
//!
//! An upserting sync never deletes. Nodes and edges of entries removed by the
//! orphan sweep remain (and stay searchable) until a sync with
//! `drop_existing = true` rebuilds the workspace.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use ontograph_storage::{
    DictKind, DictionaryEntry, Fact, OntologySnapshot, OntologyStore, ReferenceKind, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::model::{edge_key, node_key, EdgeDocument, GraphLayout, NodeDocument};
use super::ports::{CollectionKind, GraphStore, SimilarityHit};
use crate::config::GraphConfig;
use crate::errors::{OntologyError, Result};
use crate::extraction::{is_finite_vector, EmbeddingProvider};

/// Outcome of one `sync_workspace` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Rows written by successful batches
    pub objects: usize,
    pub relations: usize,
    pub facts: usize,
    /// Rows written with an embedding attached
    pub embedded: usize,
    /// Rows written with a null embedding
    pub embedding_skipped: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0
    }

    fn absorb(&mut self, outcome: BatchOutcome) {
        self.batches += 1;
        if let Some(error) = outcome.error {
            self.failed_batches += 1;
            self.errors.push(error);
            return;
        }
        match outcome.row_kind {
            RowKind::Object => self.objects += outcome.rows,
            RowKind::Relation => self.relations += outcome.rows,
            RowKind::Fact => self.facts += outcome.rows,
        }
        self.embedded += outcome.embedded;
        self.embedding_skipped += outcome.skipped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Object,
    Relation,
    Fact,
}

enum Row {
    Node(NodeDocument),
    Edge(EdgeDocument),
}

impl Row {
    fn summary(&self) -> &str {
        match self {
            Row::Node(node) => &node.summary,
            Row::Edge(edge) => &edge.summary,
        }
    }

    fn set_embedding(&mut self, vector: Vec<f64>) {
        match self {
            Row::Node(node) => node.embedding = Some(vector),
            Row::Edge(edge) => edge.embedding = Some(vector),
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Row::Node(node) => serde_json::to_value(node),
            Row::Edge(edge) => serde_json::to_value(edge),
        }
    }
}

struct Batch {
    collection: String,
    row_kind: RowKind,
    rows: Vec<Row>,
}

struct BatchOutcome {
    row_kind: RowKind,
    rows: usize,
    embedded: usize,
    skipped: usize,
    error: Option<String>,
}

#[derive(Default)]
struct Provenance {
    documents: BTreeSet<i64>,
    chunks: BTreeSet<i64>,
}

type ProvenanceIndex = HashMap<(ReferenceKind, i64), Provenance>;

pub struct GraphSynchronizer {
    store: Arc<dyn OntologyStore>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    prefix: String,
    batch_size: usize,
    workers: usize,
}

impl GraphSynchronizer {
    pub fn new(
        store: Arc<dyn OntologyStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        prefix: impl Into<String>,
        batch_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            store,
            graph,
            embedder,
            prefix: prefix.into(),
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn from_config(
        store: Arc<dyn OntologyStore>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &GraphConfig,
    ) -> Self {
        Self::new(
            store,
            graph,
            embedder,
            &config.collection_prefix,
            config.batch_size,
            config.workers,
        )
    }

    pub fn layout(&self, workspace_id: WorkspaceId) -> GraphLayout {
        GraphLayout::for_workspace(&self.prefix, workspace_id)
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub async fn sync_workspace(
        &self,
        workspace_id: WorkspaceId,
        drop_existing: bool,
    ) -> Result<SyncReport> {
        let snapshot = self.store.snapshot_workspace(workspace_id).await?;
        let layout = self.layout(workspace_id);
        self.ensure_layout(&layout, drop_existing).await?;

        let batches = self.plan_batches(workspace_id, &layout, &snapshot);
        info!(
            workspace_id,
            objects = snapshot.objects.len(),
            relations = snapshot.relations.len(),
            facts = snapshot.facts.len(),
            batches = batches.len(),
            "Starting graph sync"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let handles: Vec<_> = batches
            .into_iter()
            .map(|batch| {
                let graph = Arc::clone(&self.graph);
                let embedder = Arc::clone(&self.embedder);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let row_kind = batch.row_kind;
                    let rows = batch.rows.len();
                    match semaphore.acquire_owned().await {
                        Ok(_permit) => run_batch(graph.as_ref(), embedder.as_ref(), batch).await,
                        Err(e) => BatchOutcome {
                            row_kind,
                            rows,
                            embedded: 0,
                            skipped: 0,
                            error: Some(format!("worker pool closed: {e}")),
                        },
                    }
                })
            })
            .collect();

        let mut report = SyncReport::default();
        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    report.batches += 1;
                    report.failed_batches += 1;
                    report.errors.push(format!("batch task aborted: {e}"));
                }
            }
        }

        if report.is_complete() {
            info!(
                workspace_id,
                objects = report.objects,
                relations = report.relations,
                facts = report.facts,
                embedded = report.embedded,
                "Graph sync complete"
            );
        } else {
            warn!(
                workspace_id,
                failed_batches = report.failed_batches,
                batches = report.batches,
                "Graph sync finished with failed batches"
            );
        }
        Ok(report)
    }

    /// Embed `query` and rank the workspace's object nodes by cosine similarity
    pub async fn search_nodes(
        &self,
        workspace_id: WorkspaceId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>> {
        let vector = self.embedder.embed(query).await?;
        if !is_finite_vector(&vector) {
            return Err(OntologyError::Embedding(
                "query embedding is empty or not finite".to_string(),
            ));
        }
        let layout = self.layout(workspace_id);
        Ok(self
            .graph
            .search_similar(&layout.objects, &vector, limit)
            .await?)
    }

    async fn ensure_layout(&self, layout: &GraphLayout, drop_existing: bool) -> Result<()> {
        if drop_existing {
            debug!(graph = %layout.graph, "Dropping graph layout");
            self.graph.drop_graph(&layout.graph).await?;
            for name in [&layout.facts, &layout.relations, &layout.objects] {
                self.graph.drop_collection(name).await?;
            }
        }

        for name in [&layout.objects, &layout.relations] {
            if !self.graph.collection_exists(name).await? {
                self.graph
                    .create_collection(name, CollectionKind::Document)
                    .await?;
            }
        }
        if !self.graph.collection_exists(&layout.facts).await? {
            self.graph
                .create_collection(&layout.facts, CollectionKind::Edge)
                .await?;
        }
        if !self.graph.graph_exists(&layout.graph).await? {
            self.graph.create_graph(layout).await?;
        }

        for name in [&layout.objects, &layout.relations] {
            self.graph.ensure_index(name, &["entry_id"]).await?;
            self.graph
                .ensure_index(name, &["category", "term_en"])
                .await?;
        }
        self.graph.ensure_index(&layout.facts, &["fact_id"]).await?;
        Ok(())
    }

    fn plan_batches(
        &self,
        workspace_id: WorkspaceId,
        layout: &GraphLayout,
        snapshot: &OntologySnapshot,
    ) -> Vec<Batch> {
        let provenance = provenance_index(snapshot);
        let objects: HashMap<i64, &DictionaryEntry> =
            snapshot.objects.iter().map(|e| (e.id, e)).collect();
        let relations: HashMap<i64, &DictionaryEntry> =
            snapshot.relations.iter().map(|e| (e.id, e)).collect();

        let object_rows: Vec<Row> = snapshot
            .objects
            .iter()
            .map(|entry| Row::Node(node_document(entry, &provenance)))
            .collect();
        let relation_rows: Vec<Row> = snapshot
            .relations
            .iter()
            .map(|entry| Row::Node(node_document(entry, &provenance)))
            .collect();
        let fact_rows: Vec<Row> = snapshot
            .facts
            .iter()
            .filter_map(|fact| {
                let edge = edge_document(workspace_id, layout, fact, &objects, &relations, &provenance);
                if edge.is_none() {
                    warn!(fact_id = fact.id, "Fact references an entry outside the snapshot");
                }
                edge.map(Row::Edge)
            })
            .collect();

        let mut batches = Vec::new();
        for (collection, row_kind, rows) in [
            (&layout.objects, RowKind::Object, object_rows),
            (&layout.relations, RowKind::Relation, relation_rows),
            (&layout.facts, RowKind::Fact, fact_rows),
        ] {
            let mut rows = rows.into_iter().peekable();
            while rows.peek().is_some() {
                batches.push(Batch {
                    collection: collection.clone(),
                    row_kind,
                    rows: rows.by_ref().take(self.batch_size).collect(),
                });
            }
        }
        batches
    }
}

async fn run_batch(
    graph: &dyn GraphStore,
    embedder: &dyn EmbeddingProvider,
    mut batch: Batch,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        row_kind: batch.row_kind,
        rows: batch.rows.len(),
        embedded: 0,
        skipped: 0,
        error: None,
    };

    let texts: Vec<String> = batch.rows.iter().map(|r| r.summary().to_string()).collect();
    let vectors = embed_rows(embedder, &texts).await;
    for (row, vector) in batch.rows.iter_mut().zip(vectors) {
        match vector {
            Some(v) if is_finite_vector(&v) => {
                row.set_embedding(v);
                outcome.embedded += 1;
            }
            _ => outcome.skipped += 1,
        }
    }

    let documents: serde_json::Result<Vec<Value>> =
        batch.rows.iter().map(Row::to_value).collect();
    let result = match documents {
        Ok(documents) => graph
            .import_documents(&batch.collection, &documents)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match result {
        Ok(summary) => debug!(
            collection = %batch.collection,
            created = summary.created,
            updated = summary.updated,
            "Imported batch"
        ),
        Err(e) => {
            warn!(collection = %batch.collection, rows = outcome.rows, error = %e, "Batch import failed");
            outcome.error = Some(format!("{}: {e}", batch.collection));
        }
    }
    outcome
}

/// One vector slot per text; the batch call is tried first, then row by row
async fn embed_rows(embedder: &dyn EmbeddingProvider, texts: &[String]) -> Vec<Option<Vec<f64>>> {
    match embedder.embed_batch(texts).await {
        Ok(vectors) if vectors.len() == texts.len() => {
            return vectors.into_iter().map(Some).collect();
        }
        Ok(vectors) => debug!(
            expected = texts.len(),
            got = vectors.len(),
            "Batch embedding count mismatch, embedding rows individually"
        ),
        Err(e) => debug!(error = %e, "Batch embedding failed, embedding rows individually"),
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for text in texts {
        match embedder.embed(text).await {
            Ok(v) => vectors.push(Some(v)),
            Err(e) => {
                debug!(error = %e, "Row embedding failed");
                vectors.push(None);
            }
        }
    }
    vectors
}

fn provenance_index(snapshot: &OntologySnapshot) -> ProvenanceIndex {
    let mut index = ProvenanceIndex::new();
    for reference in &snapshot.references {
        let entry = index
            .entry((reference.kind, reference.target_id))
            .or_default();
        entry.documents.insert(reference.document_id);
        entry.chunks.insert(reference.chunk_id);
    }
    index
}

fn provenance_ids(
    index: &ProvenanceIndex,
    kind: ReferenceKind,
    id: i64,
) -> (Vec<i64>, Vec<i64>) {
    index
        .get(&(kind, id))
        .map(|p| {
            (
                p.documents.iter().copied().collect(),
                p.chunks.iter().copied().collect(),
            )
        })
        .unwrap_or_default()
}

fn node_summary(entry: &DictionaryEntry) -> String {
    let mut summary = if entry.term_en == entry.term_ko {
        entry.term_en.clone()
    } else {
        format!("{} ({})", entry.term_en, entry.term_ko)
    };
    if let Some(description) = entry.description.as_deref().filter(|d| !d.trim().is_empty()) {
        summary.push_str(": ");
        summary.push_str(description.trim());
    }
    summary
}

fn node_document(entry: &DictionaryEntry, provenance: &ProvenanceIndex) -> NodeDocument {
    let (document_ids, chunk_ids) = provenance_ids(provenance, entry.kind.reference_kind(), entry.id);
    NodeDocument {
        key: node_key(&entry.term_en, entry.id),
        entry_id: entry.id,
        workspace_id: entry.workspace_id,
        kind: entry.kind,
        category: entry.category.clone(),
        term_en: entry.term_en.clone(),
        term_ko: entry.term_ko.clone(),
        description: entry.description.clone(),
        document_ids,
        chunk_ids,
        summary: node_summary(entry),
        embedding: None,
    }
}

fn edge_document(
    workspace_id: WorkspaceId,
    layout: &GraphLayout,
    fact: &Fact,
    objects: &HashMap<i64, &DictionaryEntry>,
    relations: &HashMap<i64, &DictionaryEntry>,
    provenance: &ProvenanceIndex,
) -> Option<EdgeDocument> {
    let subject = objects.get(&fact.subject_id)?;
    let relation = relations.get(&fact.relation_id)?;
    let object = objects.get(&fact.object_id)?;
    let (document_ids, chunk_ids) = provenance_ids(provenance, ReferenceKind::Fact, fact.id);
    let collection = layout.collection_for(DictKind::Object);

    Some(EdgeDocument {
        key: edge_key(fact.id),
        from: format!("{collection}/{}", node_key(&subject.term_en, subject.id)),
        to: format!("{collection}/{}", node_key(&object.term_en, object.id)),
        fact_id: fact.id,
        workspace_id,
        relation_id: relation.id,
        relation_key: node_key(&relation.term_en, relation.id),
        relation_en: relation.term_en.clone(),
        relation_ko: relation.term_ko.clone(),
        confidence: fact.confidence,
        evidence_level: fact.evidence_level,
        document_ids,
        chunk_ids,
        summary: format!("{} {} {}", subject.term_en, relation.term_en, object.term_en),
        embedding: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ontograph_storage::{EntryStatus, EvidenceLevel, ReferenceRow};

    fn entry(id: i64, kind: DictKind, en: &str, ko: &str, description: Option<&str>) -> DictionaryEntry {
        DictionaryEntry {
            id,
            workspace_id: 1,
            kind,
            category: "ingredient".to_string(),
            term_en: en.to_string(),
            term_ko: ko.to_string(),
            description: description.map(str::to_string),
            status: EntryStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_node_summary() {
        let e = entry(1, DictKind::Object, "Vitamin C", "비타민C", Some(" antioxidant "));
        assert_eq!(node_summary(&e), "Vitamin C (비타민C): antioxidant");
        let mirrored = entry(2, DictKind::Object, "Zinc", "Zinc", None);
        assert_eq!(node_summary(&mirrored), "Zinc");
    }

    #[test]
    fn test_edge_endpoints_are_object_nodes() {
        let layout = GraphLayout::for_workspace("t", 1);
        let subject = entry(1, DictKind::Object, "Vitamin C", "비타민C", None);
        let object = entry(2, DictKind::Object, "Immunity", "면역", None);
        let relation = entry(7, DictKind::Relation, "supports", "돕다", None);
        let fact = Fact {
            id: 11,
            workspace_id: 1,
            subject_id: 1,
            relation_id: 7,
            object_id: 2,
            confidence: 0.8,
            evidence_level: EvidenceLevel::Explicit,
            created_at: Utc::now(),
        };
        let objects: HashMap<i64, &DictionaryEntry> = [(1, &subject), (2, &object)].into_iter().collect();
        let relations: HashMap<i64, &DictionaryEntry> = [(7, &relation)].into_iter().collect();
        let snapshot = OntologySnapshot {
            references: vec![
                ReferenceRow { kind: ReferenceKind::Fact, target_id: 11, document_id: 3, chunk_id: 9 },
                ReferenceRow { kind: ReferenceKind::Fact, target_id: 11, document_id: 3, chunk_id: 8 },
            ],
            ..Default::default()
        };
        let provenance = provenance_index(&snapshot);

        let edge = edge_document(1, &layout, &fact, &objects, &relations, &provenance).unwrap();
        assert_eq!(edge.key, "11");
        assert_eq!(edge.from, "t_ws1_objects/Vitamin_C_1");
        assert_eq!(edge.to, "t_ws1_objects/Immunity_2");
        assert_eq!(edge.relation_key, "supports_7");
        assert_eq!(edge.document_ids, vec![3]);
        assert_eq!(edge.chunk_ids, vec![8, 9]);
        assert_eq!(edge.summary, "Vitamin C supports Immunity");

        let mut dangling = fact.clone();
        dangling.object_id = 99;
        assert!(edge_document(1, &layout, &dangling, &objects, &relations, &provenance).is_none());
    }
}
