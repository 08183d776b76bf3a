use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ontograph_core::extraction::{is_finite_vector, EmbeddingProvider};
use ontograph_storage::DocumentStore;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::StageId;
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// VECTORIZE: embed chunk text and store one vector per chunk
///
/// Runs alongside LLM_PROCESS; it only reads chunk content and writes the
/// `embedding` column, so the two never touch the same fields.
pub struct VectorizeStage {
    documents: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl VectorizeStage {
    pub fn new(documents: Arc<dyn DocumentStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            documents,
            embedder,
            batch_size: 32,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl StageHandler for VectorizeStage {
    fn stage_id(&self) -> StageId {
        StageId::Vectorize
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let document_id = ctx.document_id();
        let chunks = self.documents.list_chunks(document_id).await?;

        let mut embedded = 0usize;
        let mut rejected = Vec::new();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| {
                OrchestratorError::StageFailed(StageFailure::new(
                    StageId::Vectorize,
                    e.is_retryable(),
                    format!("embedding failed: {e}"),
                ))
            })?;
            if vectors.len() != batch.len() {
                return Err(OrchestratorError::StageFailed(StageFailure::permanent(
                    StageId::Vectorize,
                    format!(
                        "embedding backend returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    ),
                )));
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                if is_finite_vector(&vector) {
                    self.documents.save_chunk_embedding(chunk.id, &vector).await?;
                    embedded += 1;
                } else {
                    warn!(chunk_id = chunk.id, "Skipping non-finite embedding");
                    rejected.push(format!("chunk {}: non-finite embedding", chunk.id));
                }
            }
        }

        info!(
            document_id,
            embedded,
            rejected = rejected.len(),
            dimensions = self.embedder.dimensions(),
            "Vectorized chunks"
        );

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: embedded,
            items_failed: rejected.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            errors: rejected,
        });
        output.insert("embedded_chunks", embedded);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_core::extraction::{CallError, HashingEmbeddingProvider};
    use ontograph_storage::{NewChunk, PipelineExecution, SqliteStore};

    struct FlakyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f64>, CallError> {
            Err(CallError::Api {
                status: 429,
                body: "slow down".to_string(),
            })
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    async fn setup() -> (Arc<SqliteStore>, Arc<ExecutionContext>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let doc = store.create_document(1, "Doc", "unused").await.unwrap();
        let chunks: Vec<NewChunk> = (0..5)
            .map(|i| NewChunk::new(i, format!("chunk number {i}")))
            .collect();
        store.replace_chunks(doc.id, &chunks).await.unwrap();
        let ctx = Arc::new(ExecutionContext::new(PipelineExecution::pending(1, doc.id)));
        (store, ctx)
    }

    #[tokio::test]
    async fn test_embeds_every_chunk() {
        let (store, ctx) = setup().await;
        let stage =
            VectorizeStage::new(store.clone(), Arc::new(HashingEmbeddingProvider::new(16)))
                .with_batch_size(2);

        let output = stage.execute(ctx.clone()).await.unwrap();
        assert_eq!(output.metrics.items_processed, 5);

        for chunk in store.list_chunks(ctx.document_id()).await.unwrap() {
            assert_eq!(chunk.embedding.map(|v| v.len()), Some(16));
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable_failure() {
        let (store, ctx) = setup().await;
        let stage = VectorizeStage::new(store, Arc::new(FlakyEmbedder));

        match stage.execute(ctx).await {
            Err(OrchestratorError::StageFailed(failure)) => {
                assert_eq!(failure.stage, StageId::Vectorize);
                assert!(failure.retryable);
            }
            other => panic!("expected stage failure, got {other:?}"),
        }
    }
}
