use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ontograph_core::config::ChunkingConfig;
use ontograph_core::ontology::ReferenceTracker;
use ontograph_storage::{DocumentStore, NewChunk};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::StageId;
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// Split `text` into chunks of at most `chunk_size` chars
///
/// A chunk prefers to end on a paragraph break, then a line break, then a
/// sentence end, then whitespace, as long as that keeps it above half the
/// target size. Neighbouring chunks share up to `overlap` chars.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            boundary_before(&chars, start + chunk_size / 2, hard_end).unwrap_or(hard_end)
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    chunks
}

/// Best cut position in `(floor, end]`, strongest boundary first
fn boundary_before(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    let window = floor..end;
    let rfind = |pred: &dyn Fn(usize) -> bool| window.clone().rev().find(|&i| pred(i)).map(|i| i + 1);

    rfind(&|i| chars[i] == '\n' && i > 0 && chars[i - 1] == '\n')
        .or_else(|| rfind(&|i| chars[i] == '\n'))
        .or_else(|| {
            rfind(&|i| {
                matches!(chars[i], '.' | '!' | '?' | '。')
                    && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
            })
        })
        .or_else(|| rfind(&|i| chars[i].is_whitespace()))
}

/// CHUNK: split parsed text and replace the document's chunk rows
///
/// Re-chunking drops the document's previous ontology references first, so
/// entries only referenced by the old chunks become sweepable.
pub struct ChunkStage {
    documents: Arc<dyn DocumentStore>,
    tracker: Option<Arc<ReferenceTracker>>,
    config: ChunkingConfig,
}

impl ChunkStage {
    pub fn new(documents: Arc<dyn DocumentStore>, config: ChunkingConfig) -> Self {
        Self {
            documents,
            tracker: None,
            config,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<ReferenceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

#[async_trait]
impl StageHandler for ChunkStage {
    fn stage_id(&self) -> StageId {
        StageId::Chunk
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let document_id = ctx.document_id();

        let document = self.documents.get_document(document_id).await?.ok_or_else(|| {
            OrchestratorError::StageFailed(StageFailure::permanent(
                StageId::Chunk,
                format!("document {document_id} does not exist"),
            ))
        })?;
        let text = document.parsed_content.as_deref().unwrap_or(&document.content);

        let pieces = split_text(text, self.config.chunk_size, self.config.chunk_overlap);
        if pieces.is_empty() {
            return Err(OrchestratorError::StageFailed(StageFailure::permanent(
                StageId::Chunk,
                format!("document {document_id} produced no chunks"),
            )));
        }

        if let Some(tracker) = &self.tracker {
            if !self.documents.list_chunks(document_id).await?.is_empty() {
                let removal = tracker.remove_document(document_id).await?;
                if removal.references_deleted > 0 {
                    warn!(
                        document_id,
                        references_deleted = removal.references_deleted,
                        "Dropped references of previous chunks"
                    );
                }
            }
        }

        let new_chunks: Vec<NewChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(seq, content)| NewChunk::new(seq as u32, content))
            .collect();
        let stored = self.documents.replace_chunks(document_id, &new_chunks).await?;
        let chunk_ids: Vec<i64> = stored.iter().map(|c| c.id).collect();

        info!(
            document_id,
            chunks = stored.len(),
            chunk_size = self.config.chunk_size,
            overlap = self.config.chunk_overlap,
            "Chunked document"
        );

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: stored.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        });
        output.insert("chunk_count", stored.len());
        output.insert("chunk_ids", chunk_ids);
        Ok(output)
    }
}
