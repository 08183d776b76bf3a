//! Reference Tracker & orphan sweep
//!
//! Reference rows record which `(document, chunk)` produced an entry or fact.
//! Removing a document deletes its rows, then sweeps everything left without
//! references:
//!
//! 1. facts with zero reference rows
//! 2. synonyms of object/relation entries about to go
//! 3. object/relation entries with zero references and no surviving fact
//!
//! # Ingest gate
//!
//! A sweep must never interleave with a resolve-then-reference sequence on
//! the same entry. Ingestion holds a read guard of the gate for the whole
//! chunk; removal holds the write guard across reference deletion and the
//! sweep.

use std::sync::Arc;

use ontograph_storage::{
    ChunkId, DictKind, DocumentId, OntologyStore, ReferenceKind, SweepReport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::errors::Result;

/// Outcome of a document (or partial document) removal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub references_deleted: usize,
    /// `None` when the sweep failed (logged, not propagated)
    pub sweep: Option<SweepReport>,
}

pub struct ReferenceTracker {
    store: Arc<dyn OntologyStore>,
    gate: RwLock<()>,
}

impl ReferenceTracker {
    pub fn new(store: Arc<dyn OntologyStore>) -> Self {
        Self {
            store,
            gate: RwLock::new(()),
        }
    }

    /// Shared guard held while a chunk is resolved and referenced
    ///
    /// Do not call [`remove_document`](Self::remove_document) or
    /// [`sweep_orphans`](Self::sweep_orphans) while holding it.
    pub async fn ingest_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Record that `(document, chunk)` produced `target_id`
    ///
    /// Idempotent; returns `true` when a new row was written.
    pub async fn record_reference(
        &self,
        kind: ReferenceKind,
        target_id: i64,
        document_id: DocumentId,
        chunk_id: ChunkId,
    ) -> Result<bool> {
        Ok(self
            .store
            .insert_reference(kind, target_id, document_id, chunk_id)
            .await?)
    }

    pub async fn reference_count(&self, kind: ReferenceKind, target_id: i64) -> Result<usize> {
        Ok(self.store.count_references(kind, target_id).await?)
    }

    /// Delete every reference of `document_id`, then sweep orphans
    pub async fn remove_document(&self, document_id: DocumentId) -> Result<RemovalReport> {
        self.remove_document_source(document_id, &[]).await
    }

    /// Delete references of the given chunks (all chunks when empty), then sweep
    ///
    /// Reference deletion errors propagate. Sweep errors are logged and
    /// swallowed so the removal itself still completes.
    pub async fn remove_document_source(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
    ) -> Result<RemovalReport> {
        let _gate = self.gate.write().await;

        let references_deleted = self
            .store
            .delete_references_by_document(document_id, chunk_ids)
            .await?;

        let sweep = match self.sweep_locked().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(document_id, error = %e, "Orphan sweep failed after reference removal");
                None
            }
        };

        info!(
            document_id,
            chunks = chunk_ids.len(),
            references_deleted,
            swept = sweep.as_ref().map(SweepReport::total).unwrap_or(0),
            "Removed document references"
        );
        Ok(RemovalReport {
            references_deleted,
            sweep,
        })
    }

    /// Run a standalone sweep
    pub async fn sweep_orphans(&self) -> Result<SweepReport> {
        let _gate = self.gate.write().await;
        self.sweep_locked().await
    }

    async fn sweep_locked(&self) -> Result<SweepReport> {
        let store = &self.store;
        let facts = store.delete_orphan_facts().await?;
        let object_synonyms = store
            .delete_synonyms_of_orphan_entries(DictKind::Object)
            .await?;
        let relation_synonyms = store
            .delete_synonyms_of_orphan_entries(DictKind::Relation)
            .await?;
        let objects = store.delete_orphan_entries(DictKind::Object).await?;
        let relations = store.delete_orphan_entries(DictKind::Relation).await?;
        Ok(SweepReport {
            facts,
            object_synonyms,
            relation_synonyms,
            objects,
            relations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_storage::{NewDictionaryEntry, SqliteStore};

    async fn seed_entry(store: &SqliteStore) -> i64 {
        store
            .insert_entry(&NewDictionaryEntry {
                workspace_id: 1,
                kind: DictKind::Object,
                category: "ingredient".to_string(),
                term_en: "VitaminC".to_string(),
                term_ko: "비타민C".to_string(),
                description: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_record_reference_is_idempotent() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = seed_entry(&store).await;
        let tracker = ReferenceTracker::new(store.clone());

        assert!(tracker.record_reference(ReferenceKind::Object, id, 5, 9).await.unwrap());
        assert!(!tracker.record_reference(ReferenceKind::Object, id, 5, 9).await.unwrap());
        assert_eq!(tracker.reference_count(ReferenceKind::Object, id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_removal_keeps_entry() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = seed_entry(&store).await;
        let tracker = ReferenceTracker::new(store.clone());
        tracker.record_reference(ReferenceKind::Object, id, 5, 9).await.unwrap();
        tracker.record_reference(ReferenceKind::Object, id, 5, 10).await.unwrap();

        let report = tracker.remove_document_source(5, &[9]).await.unwrap();
        assert_eq!(report.references_deleted, 1);
        assert_eq!(report.sweep.unwrap().objects, 0);
        assert!(store.get_entry(DictKind::Object, id).await.unwrap().is_some());

        let report = tracker.remove_document(5).await.unwrap();
        assert_eq!(report.sweep.unwrap().objects, 1);
        assert!(store.get_entry(DictKind::Object, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_removal_waits_for_ingest_guard() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let id = seed_entry(&store).await;
        let tracker = Arc::new(ReferenceTracker::new(store.clone()));

        let guard = tracker.ingest_guard().await;
        let remover = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.remove_document(5).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!remover.is_finished());

        // Reference recorded while the remover is blocked survives the sweep
        tracker.record_reference(ReferenceKind::Object, id, 6, 1).await.unwrap();
        drop(guard);

        remover.await.unwrap().unwrap();
        assert!(store.get_entry(DictKind::Object, id).await.unwrap().is_some());
    }
}
