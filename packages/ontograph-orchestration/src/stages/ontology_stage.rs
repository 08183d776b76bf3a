use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ontograph_core::extraction::ExtractionPayload;
use ontograph_core::ontology::{IngestReport, OntologyIngestor};
use ontograph_storage::{ChunkStatus, DocumentChunk, DocumentStore};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::{truncate_message, StageId};
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// EXTRACT_ONTOLOGY: fold each extracted chunk into the dictionaries
///
/// Chunks are ingested one at a time in `seq` order so first-writer ids are
/// stable for a given document.
pub struct ExtractOntologyStage {
    documents: Arc<dyn DocumentStore>,
    ingestor: Arc<OntologyIngestor>,
    error_limit: usize,
}

impl ExtractOntologyStage {
    pub fn new(documents: Arc<dyn DocumentStore>, ingestor: Arc<OntologyIngestor>) -> Self {
        Self {
            documents,
            ingestor,
            error_limit: 1000,
        }
    }

    pub fn with_error_limit(mut self, error_limit: usize) -> Self {
        self.error_limit = error_limit;
        self
    }

    async fn ingest(&self, ctx: &ExecutionContext, chunk: &DocumentChunk, raw: &str) -> Result<IngestReport> {
        let payload = ExtractionPayload::parse(raw)?;
        let report = self
            .ingestor
            .ingest_chunk(ctx.workspace_id(), ctx.document_id(), chunk.id, &payload)
            .await?;
        Ok(report)
    }
}

#[async_trait]
impl StageHandler for ExtractOntologyStage {
    fn stage_id(&self) -> StageId {
        StageId::ExtractOntology
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let chunks = self.documents.list_chunks(ctx.document_id()).await?;

        let mut total = IngestReport::default();
        let mut attempted = 0usize;
        let mut errors = Vec::new();
        let mut last_retryable = false;

        for chunk in &chunks {
            let raw = match (&chunk.extraction_status, chunk.extraction_payload.as_deref()) {
                (ChunkStatus::Completed, Some(raw)) => raw,
                _ => continue,
            };
            attempted += 1;

            match self.ingest(&ctx, chunk, raw).await {
                Ok(report) => {
                    total.merge(&report);
                    self.documents
                        .update_chunk_ontology(chunk.id, ChunkStatus::Completed, None)
                        .await?;
                }
                Err(e) => {
                    last_retryable = e.category().is_retryable();
                    let message = truncate_message(&e.to_string(), self.error_limit);
                    warn!(chunk_id = chunk.id, error = %message, "Ontology ingest failed");
                    self.documents
                        .update_chunk_ontology(chunk.id, ChunkStatus::Failed, Some(&message))
                        .await?;
                    errors.push(message);
                }
            }
        }

        info!(
            document_id = ctx.document_id(),
            attempted,
            failed = errors.len(),
            entities = total.entities,
            facts = total.facts,
            entries_created = total.entries_created,
            "Ontology extraction finished"
        );

        if attempted > 0 && errors.len() == attempted {
            return Err(OrchestratorError::StageFailed(StageFailure::new(
                StageId::ExtractOntology,
                last_retryable,
                format!("all {attempted} chunks failed ingest; last error: {}", errors[attempted - 1]),
            )));
        }

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: attempted - errors.len(),
            items_failed: errors.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            errors,
        });
        output.insert("ontology", &total);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_core::config::ResolverConfig;
    use ontograph_core::ontology::{DictionaryResolver, ReferenceTracker};
    use ontograph_storage::{NewChunk, PipelineExecution, SqliteStore};

    const PAYLOAD: &str = r#"{
        "entities": [{"category": "ingredient", "term_en": "Vitamin C", "term_ko": "비타민C"}],
        "triples": [{
            "subject": {"category": "ingredient", "term_en": "Vitamin C", "term_ko": "비타민C"},
            "relation": {"category": "effect", "term_en": "supports", "term_ko": "돕는다"},
            "object": {"category": "function", "term_en": "Immunity", "term_ko": "면역"},
            "confidence": 0.9
        }]
    }"#;

    #[tokio::test]
    async fn test_ingests_only_extracted_chunks() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let doc = store.create_document(1, "Doc", "unused").await.unwrap();
        let chunks = store
            .replace_chunks(doc.id, &[NewChunk::new(0, "a"), NewChunk::new(1, "b")])
            .await
            .unwrap();
        store
            .update_chunk_extraction(chunks[0].id, ChunkStatus::Completed, Some(PAYLOAD), None)
            .await
            .unwrap();

        let resolver = Arc::new(DictionaryResolver::new(store.clone(), &ResolverConfig::default()));
        let tracker = Arc::new(ReferenceTracker::new(store.clone()));
        let ingestor = Arc::new(OntologyIngestor::new(resolver, tracker));
        let stage = ExtractOntologyStage::new(store.clone(), ingestor);

        let ctx = Arc::new(ExecutionContext::new(PipelineExecution::pending(1, doc.id)));
        let output = stage.execute(ctx).await.unwrap();
        assert_eq!(output.metrics.items_processed, 1);

        let report: IngestReport = serde_json::from_value(output.metadata["ontology"].clone()).unwrap();
        assert_eq!(report.entities, 1);
        assert_eq!(report.facts, 1);
        assert_eq!(report.entries_created, 3);

        let stored = store.list_chunks(doc.id).await.unwrap();
        assert_eq!(stored[0].ontology_status, ChunkStatus::Completed);
        assert_eq!(stored[1].ontology_status, ChunkStatus::Pending);
    }
}
