//! Applies one chunk's extraction payload to the ontology

use std::sync::Arc;

use ontograph_storage::{ChunkId, DictKind, DocumentId, ReferenceKind, WorkspaceId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::reference::ReferenceTracker;
use super::resolver::DictionaryResolver;
use crate::errors::Result;
use crate::extraction::{ExtractedTerm, ExtractionPayload};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub entities: usize,
    pub facts: usize,
    /// Entries newly inserted into either dictionary
    pub entries_created: usize,
    /// Reference rows actually written (repeats are no-ops)
    pub references_added: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.entities += other.entities;
        self.facts += other.facts;
        self.entries_created += other.entries_created;
        self.references_added += other.references_added;
    }
}

/// Resolver + tracker, run under the tracker's ingest gate
pub struct OntologyIngestor {
    resolver: Arc<DictionaryResolver>,
    tracker: Arc<ReferenceTracker>,
}

impl OntologyIngestor {
    pub fn new(resolver: Arc<DictionaryResolver>, tracker: Arc<ReferenceTracker>) -> Self {
        Self { resolver, tracker }
    }

    pub fn resolver(&self) -> &Arc<DictionaryResolver> {
        &self.resolver
    }

    pub fn tracker(&self) -> &Arc<ReferenceTracker> {
        &self.tracker
    }

    /// Resolve every entity and triple of `payload` and reference them from
    /// `(document_id, chunk_id)`
    pub async fn ingest_chunk(
        &self,
        workspace_id: WorkspaceId,
        document_id: DocumentId,
        chunk_id: ChunkId,
        payload: &ExtractionPayload,
    ) -> Result<IngestReport> {
        let _gate = self.tracker.ingest_guard().await;
        let mut report = IngestReport::default();

        for entity in &payload.entities {
            self.reference_term(
                workspace_id,
                DictKind::Object,
                entity,
                document_id,
                chunk_id,
                &mut report,
            )
            .await?;
            report.entities += 1;
        }

        for triple in &payload.triples {
            let subject = self
                .reference_term(
                    workspace_id,
                    DictKind::Object,
                    &triple.subject,
                    document_id,
                    chunk_id,
                    &mut report,
                )
                .await?;
            let relation = self
                .reference_term(
                    workspace_id,
                    DictKind::Relation,
                    &triple.relation,
                    document_id,
                    chunk_id,
                    &mut report,
                )
                .await?;
            let object = self
                .reference_term(
                    workspace_id,
                    DictKind::Object,
                    &triple.object,
                    document_id,
                    chunk_id,
                    &mut report,
                )
                .await?;

            let fact_id = self
                .resolver
                .find_or_create_fact(
                    workspace_id,
                    subject,
                    relation,
                    object,
                    triple.confidence,
                    triple.evidence(),
                )
                .await?;
            if self
                .tracker
                .record_reference(ReferenceKind::Fact, fact_id, document_id, chunk_id)
                .await?
            {
                report.references_added += 1;
            }
            report.facts += 1;
        }

        debug!(
            workspace_id,
            document_id,
            chunk_id,
            entities = report.entities,
            facts = report.facts,
            references_added = report.references_added,
            "Ingested chunk"
        );
        Ok(report)
    }

    async fn reference_term(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        term: &ExtractedTerm,
        document_id: DocumentId,
        chunk_id: ChunkId,
        report: &mut IngestReport,
    ) -> Result<i64> {
        let resolution = self.resolver.resolve(workspace_id, kind, term).await?;
        if resolution.created {
            report.entries_created += 1;
        }
        if self
            .tracker
            .record_reference(kind.reference_kind(), resolution.id, document_id, chunk_id)
            .await?
        {
            report.references_added += 1;
        }
        Ok(resolution.id)
    }
}
