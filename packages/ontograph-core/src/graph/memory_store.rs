//! In-memory graph store
//!
//! Same upsert and search semantics as the ArangoDB adapter; used when no graph
//! URL is configured and by the test suites.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::model::{cosine_similarity, GraphLayout};
use super::ports::{
    CollectionKind, GraphError, GraphResult, GraphStore, ImportSummary, SimilarityHit,
};

struct MemCollection {
    kind: CollectionKind,
    documents: BTreeMap<String, Map<String, Value>>,
    indexes: Vec<Vec<String>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, MemCollection>,
    graphs: HashMap<String, GraphLayout>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index definitions of a collection (tests)
    pub fn indexes(&self, collection: &str) -> Vec<Vec<String>> {
        self.inner
            .read()
            .collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn collection_exists(&self, name: &str) -> GraphResult<bool> {
        Ok(self.inner.read().collections.contains_key(name))
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> GraphResult<()> {
        self.inner
            .write()
            .collections
            .entry(name.to_string())
            .or_insert_with(|| MemCollection {
                kind,
                documents: BTreeMap::new(),
                indexes: Vec::new(),
            });
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> GraphResult<()> {
        self.inner.write().collections.remove(name);
        Ok(())
    }

    async fn graph_exists(&self, name: &str) -> GraphResult<bool> {
        Ok(self.inner.read().graphs.contains_key(name))
    }

    async fn create_graph(&self, layout: &GraphLayout) -> GraphResult<()> {
        let mut inner = self.inner.write();
        for name in [&layout.objects, &layout.relations, &layout.facts] {
            if !inner.collections.contains_key(name) {
                return Err(GraphError::CollectionNotFound(name.clone()));
            }
        }
        inner.graphs.insert(layout.graph.clone(), layout.clone());
        Ok(())
    }

    async fn drop_graph(&self, name: &str) -> GraphResult<()> {
        self.inner.write().graphs.remove(name);
        Ok(())
    }

    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> GraphResult<()> {
        let mut inner = self.inner.write();
        let target = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| GraphError::CollectionNotFound(collection.to_string()))?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        if !target.indexes.contains(&fields) {
            target.indexes.push(fields);
        }
        Ok(())
    }

    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Value],
    ) -> GraphResult<ImportSummary> {
        let mut inner = self.inner.write();
        let target = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| GraphError::CollectionNotFound(collection.to_string()))?;

        let mut summary = ImportSummary::default();
        for document in documents {
            let Some(fields) = document.as_object() else {
                summary.errors += 1;
                continue;
            };
            let Some(key) = fields.get("_key").and_then(Value::as_str) else {
                summary.errors += 1;
                continue;
            };
            if target.kind == CollectionKind::Edge
                && (!fields.contains_key("_from") || !fields.contains_key("_to"))
            {
                summary.errors += 1;
                continue;
            }
            match target.documents.get_mut(key) {
                Some(existing) => {
                    for (field, value) in fields {
                        existing.insert(field.clone(), value.clone());
                    }
                    summary.updated += 1;
                }
                None => {
                    target.documents.insert(key.to_string(), fields.clone());
                    summary.created += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn get_document(&self, collection: &str, key: &str) -> GraphResult<Option<Value>> {
        let inner = self.inner.read();
        let target = inner
            .collections
            .get(collection)
            .ok_or_else(|| GraphError::CollectionNotFound(collection.to_string()))?;
        Ok(target.documents.get(key).cloned().map(Value::Object))
    }

    async fn count_documents(&self, collection: &str) -> GraphResult<usize> {
        let inner = self.inner.read();
        inner
            .collections
            .get(collection)
            .map(|c| c.documents.len())
            .ok_or_else(|| GraphError::CollectionNotFound(collection.to_string()))
    }

    async fn search_similar(
        &self,
        collection: &str,
        vector: &[f64],
        limit: usize,
    ) -> GraphResult<Vec<SimilarityHit>> {
        let inner = self.inner.read();
        let target = inner
            .collections
            .get(collection)
            .ok_or_else(|| GraphError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<SimilarityHit> = target
            .documents
            .iter()
            .filter_map(|(key, fields)| {
                let embedding: Vec<f64> = fields
                    .get("embedding")?
                    .as_array()?
                    .iter()
                    .map(Value::as_f64)
                    .collect::<Option<_>>()?;
                let score = cosine_similarity(vector, &embedding)?;
                Some(SimilarityHit {
                    key: key.clone(),
                    score,
                    document: Value::Object(fields.clone()),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        hits.truncate(limit);
        Ok(hits)
    }
}
