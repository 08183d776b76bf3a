use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ontograph_storage::{DocumentId, ExecutionStatus, PipelineExecution, WorkspaceId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StageFailure};
use crate::job::StageId;

/// Per-run state handed to stage units
///
/// Units receive an immutable snapshot (`Arc<ExecutionContext>`) and report
/// their additions through [`StageOutput::metadata`]; the orchestrator merges
/// those after the group's join barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub execution: PipelineExecution,
    pub metadata: BTreeMap<String, Value>,
    /// First failure of a FAILED run
    pub failure: Option<StageFailure>,
}

impl ExecutionContext {
    pub fn new(execution: PipelineExecution) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            execution,
            metadata: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.execution.workspace_id
    }

    pub fn document_id(&self) -> DocumentId {
        self.execution.document_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    /// Typed read of a metadata entry written by an earlier stage
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.metadata
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn merge(&mut self, output: &StageOutput) {
        for (key, value) in &output.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Stage metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub items_processed: usize,
    pub items_failed: usize,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

/// Stage output
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub metadata: BTreeMap<String, Value>,
    pub metrics: StageMetrics,
}

impl StageOutput {
    pub fn with_metrics(metrics: StageMetrics) -> Self {
        Self {
            metadata: BTreeMap::new(),
            metrics,
        }
    }

    /// Add a metadata entry; values that fail to serialize are stored as null
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.metadata.insert(key.into(), value);
    }
}

/// Stage handler trait (pluggable stages)
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage_id(&self) -> StageId;

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_by_key() {
        let mut ctx = ExecutionContext::new(PipelineExecution::pending(1, 2));
        let mut first = StageOutput::default();
        first.insert("chunk_count", 3);
        first.insert("parsed_chars", 120);
        ctx.merge(&first);

        let mut second = StageOutput::default();
        second.insert("chunk_count", 4);
        ctx.merge(&second);

        assert_eq!(ctx.get::<usize>("chunk_count"), Some(4));
        assert_eq!(ctx.get::<usize>("parsed_chars"), Some(120));
        assert_eq!(ctx.get::<String>("missing"), None);
    }

    #[test]
    fn test_context_accessors() {
        let ctx = ExecutionContext::new(PipelineExecution::pending(7, 9));
        assert_eq!(ctx.workspace_id(), 7);
        assert_eq!(ctx.document_id(), 9);
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
    }
}
