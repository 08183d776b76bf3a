use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ontograph_storage::DocumentStore;
use tracing::info;

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::StageId;
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// Normalize raw document text
///
/// - CRLF/CR → LF, control chars other than `\n`/`\t` dropped
/// - runs of spaces/tabs collapsed to one space, lines trimmed
/// - more than one blank line collapsed to one
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;

    for line in unified.split('\n') {
        let mut cleaned = String::with_capacity(line.len());
        for c in line.chars() {
            if c == '\t' || c == ' ' {
                if !cleaned.ends_with(' ') {
                    cleaned.push(' ');
                }
            } else if !c.is_control() {
                cleaned.push(c);
            }
        }
        let cleaned = cleaned.trim().to_string();

        if cleaned.is_empty() {
            blank_run += 1;
            if blank_run > 1 || lines.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(cleaned);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// PARSE: load the document, normalize its text and persist the result
pub struct ParseStage {
    documents: Arc<dyn DocumentStore>,
}

impl ParseStage {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl StageHandler for ParseStage {
    fn stage_id(&self) -> StageId {
        StageId::Parse
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let document_id = ctx.document_id();

        let document = self.documents.get_document(document_id).await?.ok_or_else(|| {
            OrchestratorError::StageFailed(StageFailure::permanent(
                StageId::Parse,
                format!("document {document_id} does not exist"),
            ))
        })?;

        let parsed = normalize_text(&document.content);
        if parsed.is_empty() {
            return Err(OrchestratorError::StageFailed(StageFailure::permanent(
                StageId::Parse,
                format!("document {document_id} has no text"),
            )));
        }
        self.documents.save_parsed_content(document_id, &parsed).await?;

        let chars = parsed.chars().count();
        info!(
            document_id,
            raw_chars = document.content.chars().count(),
            parsed_chars = chars,
            "Parsed document"
        );

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: 1,
            duration_ms: start.elapsed().as_millis() as u64,
            ..Default::default()
        });
        output.insert("parsed_chars", chars);
        output.insert("title", &document.title);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_storage::{PipelineExecution, SqliteStore};

    #[test]
    fn test_normalize_text() {
        let raw = "\r\n  Title\t\tline \r\n\r\n\r\n\u{0007}Body  text\u{0000}\n\n";
        assert_eq!(normalize_text(raw), "Title line\n\nBody text");
    }

    #[test]
    fn test_normalize_keeps_unicode() {
        assert_eq!(normalize_text("비타민C는   면역에\t좋다"), "비타민C는 면역에 좋다");
        assert_eq!(normalize_text(" \n\t \n"), "");
    }

    #[tokio::test]
    async fn test_parse_persists_normalized_text() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let doc = store.create_document(1, "Notes", "a   b\r\nc").await.unwrap();
        let stage = ParseStage::new(store.clone());

        let ctx = Arc::new(ExecutionContext::new(PipelineExecution::pending(1, doc.id)));
        let output = stage.execute(ctx).await.unwrap();
        assert_eq!(output.metadata["parsed_chars"], 5);

        let stored = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.parsed_content.as_deref(), Some("a b\nc"));
    }

    #[tokio::test]
    async fn test_missing_document_is_permanent() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let stage = ParseStage::new(store);
        let ctx = Arc::new(ExecutionContext::new(PipelineExecution::pending(1, 99)));

        match stage.execute(ctx).await {
            Err(OrchestratorError::StageFailed(failure)) => assert!(!failure.retryable),
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }
}
