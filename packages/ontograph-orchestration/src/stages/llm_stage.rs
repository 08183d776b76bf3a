use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ontograph_core::extraction::{ExtractionCaller, ExtractionPayload, ONTOLOGY_EXTRACTION_PROMPT};
use ontograph_core::OntologyError;
use ontograph_storage::{ChunkStatus, DocumentChunk, DocumentStore};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::{truncate_message, StageId};
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// LLM_PROCESS: run the extraction prompt over every chunk
///
/// Chunks are processed concurrently up to `max_concurrent`. A chunk whose
/// call or payload fails is marked FAILED with its error; the stage itself
/// only fails when no chunk succeeded.
pub struct LlmProcessStage {
    documents: Arc<dyn DocumentStore>,
    caller: Arc<dyn ExtractionCaller>,
    prompt_ref: String,
    max_concurrent: usize,
    error_limit: usize,
}

impl LlmProcessStage {
    pub fn new(documents: Arc<dyn DocumentStore>, caller: Arc<dyn ExtractionCaller>) -> Self {
        Self {
            documents,
            caller,
            prompt_ref: ONTOLOGY_EXTRACTION_PROMPT.to_string(),
            max_concurrent: 4,
            error_limit: 1000,
        }
    }

    pub fn with_prompt(mut self, prompt_ref: impl Into<String>) -> Self {
        self.prompt_ref = prompt_ref.into();
        self
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_error_limit(mut self, error_limit: usize) -> Self {
        self.error_limit = error_limit;
        self
    }

    async fn extract(
        &self,
        title: &str,
        chunk: &DocumentChunk,
    ) -> std::result::Result<ExtractionPayload, OntologyError> {
        let variables = HashMap::from([
            ("title".to_string(), title.to_string()),
            ("content".to_string(), chunk.content.clone()),
        ]);
        let raw = self.caller.call(&self.prompt_ref, &variables).await?;
        ExtractionPayload::parse(&raw)
    }

    /// Returns the chunk's error message on failure
    async fn process_chunk(&self, title: &str, chunk: DocumentChunk) -> Result<Option<String>> {
        self.documents
            .update_chunk_extraction(chunk.id, ChunkStatus::Processing, None, None)
            .await?;

        let extracted = match self.extract(title, &chunk).await {
            Ok(payload) => payload.to_json(),
            Err(e) => Err(e),
        };

        match extracted {
            Ok(json) => {
                self.documents
                    .update_chunk_extraction(chunk.id, ChunkStatus::Completed, Some(&json), None)
                    .await?;
                debug!(chunk_id = chunk.id, seq = chunk.seq, "Chunk extracted");
                Ok(None)
            }
            Err(e) => {
                let message = truncate_message(&e.to_string(), self.error_limit);
                warn!(chunk_id = chunk.id, seq = chunk.seq, error = %message, "Chunk extraction failed");
                self.documents
                    .update_chunk_extraction(chunk.id, ChunkStatus::Failed, None, Some(&message))
                    .await?;
                Ok(Some(message))
            }
        }
    }
}

#[async_trait]
impl StageHandler for LlmProcessStage {
    fn stage_id(&self) -> StageId {
        StageId::LlmProcess
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let document_id = ctx.document_id();
        let title = match ctx.get::<String>("title") {
            Some(title) => title,
            None => self
                .documents
                .get_document(document_id)
                .await?
                .map(|d| d.title)
                .unwrap_or_default(),
        };

        let chunks = self.documents.list_chunks(document_id).await?;
        if chunks.is_empty() {
            return Err(OrchestratorError::StageFailed(StageFailure::permanent(
                StageId::LlmProcess,
                format!("document {document_id} has no chunks"),
            )));
        }
        let total = chunks.len();

        let results: Vec<Result<Option<String>>> = stream::iter(chunks)
            .map(|chunk| self.process_chunk(&title, chunk))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut errors = Vec::new();
        for result in results {
            if let Some(message) = result? {
                errors.push(message);
            }
        }
        let failed = errors.len();

        info!(
            document_id,
            chunks = total,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "LLM extraction finished"
        );

        if failed == total {
            let first = errors.first().cloned().unwrap_or_default();
            return Err(OrchestratorError::StageFailed(StageFailure::retryable(
                StageId::LlmProcess,
                format!("all {total} chunks failed extraction; first error: {first}"),
            )));
        }

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: total - failed,
            items_failed: failed,
            duration_ms: start.elapsed().as_millis() as u64,
            errors,
        });
        output.insert("extracted_chunks", total - failed);
        output.insert("failed_chunks", failed);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_core::extraction::CallError;
    use ontograph_storage::{NewChunk, PipelineExecution, SqliteStore};

    /// Answers with a fixed payload unless the chunk text contains "broken"
    struct ScriptedCaller;

    #[async_trait]
    impl ExtractionCaller for ScriptedCaller {
        async fn call(
            &self,
            _prompt_ref: &str,
            variables: &HashMap<String, String>,
        ) -> std::result::Result<String, CallError> {
            if variables["content"].contains("broken") {
                return Ok("not json at all".to_string());
            }
            if variables["content"].contains("down") {
                return Err(CallError::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(r#"{"entities":[{"category":"ingredient","term_en":"Zinc","term_ko":"아연"}]}"#
                .to_string())
        }
    }

    async fn setup(texts: &[&str]) -> (Arc<SqliteStore>, Arc<ExecutionContext>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let doc = store.create_document(1, "Doc", "unused").await.unwrap();
        let chunks: Vec<NewChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| NewChunk::new(i as u32, *t))
            .collect();
        store.replace_chunks(doc.id, &chunks).await.unwrap();
        let ctx = Arc::new(ExecutionContext::new(PipelineExecution::pending(1, doc.id)));
        (store, ctx)
    }

    #[tokio::test]
    async fn test_partial_failure_marks_chunks() {
        let (store, ctx) = setup(&["zinc is good", "broken output"]).await;
        let stage = LlmProcessStage::new(store.clone(), Arc::new(ScriptedCaller)).with_concurrency(2);

        let output = stage.execute(ctx.clone()).await.unwrap();
        assert_eq!(output.metrics.items_processed, 1);
        assert_eq!(output.metrics.items_failed, 1);

        let chunks = store.list_chunks(ctx.document_id()).await.unwrap();
        assert_eq!(chunks[0].extraction_status, ChunkStatus::Completed);
        assert!(chunks[0].extraction_payload.as_deref().unwrap().contains("Zinc"));
        assert_eq!(chunks[1].extraction_status, ChunkStatus::Failed);
        assert!(chunks[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("Malformed extraction payload"));
    }

    #[tokio::test]
    async fn test_all_chunks_failing_fails_stage() {
        let (store, ctx) = setup(&["service down", "still down"]).await;
        let stage = LlmProcessStage::new(store, Arc::new(ScriptedCaller));

        match stage.execute(ctx).await {
            Err(OrchestratorError::StageFailed(failure)) => {
                assert_eq!(failure.stage, StageId::LlmProcess);
                assert!(failure.retryable);
            }
            other => panic!("expected stage failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_message_is_truncated() {
        let (store, ctx) = setup(&["broken", "fine"]).await;
        let stage = LlmProcessStage::new(store.clone(), Arc::new(ScriptedCaller)).with_error_limit(10);
        stage.execute(ctx.clone()).await.unwrap();

        let chunks = store.list_chunks(ctx.document_id()).await.unwrap();
        assert!(chunks[0].error_message.as_deref().unwrap().chars().count() <= 10);
    }
}
