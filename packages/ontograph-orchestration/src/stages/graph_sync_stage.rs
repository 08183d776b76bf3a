use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ontograph_core::graph::GraphSynchronizer;

use crate::error::{OrchestratorError, Result, StageFailure};
use crate::job::StageId;
use crate::pipeline::{ExecutionContext, StageHandler, StageMetrics, StageOutput};

/// GRAPH_SYNC: project the workspace ontology into the graph store
pub struct GraphSyncStage {
    sync: Arc<GraphSynchronizer>,
}

impl GraphSyncStage {
    pub fn new(sync: Arc<GraphSynchronizer>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl StageHandler for GraphSyncStage {
    fn stage_id(&self) -> StageId {
        StageId::GraphSync
    }

    async fn execute(&self, ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        let start = Instant::now();
        let report = self.sync.sync_workspace(ctx.workspace_id(), false).await?;

        // Written batches stay written; a rerun upserts the same keys
        if !report.is_complete() {
            return Err(OrchestratorError::StageFailed(StageFailure::retryable(
                StageId::GraphSync,
                format!(
                    "{} of {} graph batches failed: {}",
                    report.failed_batches,
                    report.batches,
                    report.errors.join("; ")
                ),
            )));
        }

        let mut output = StageOutput::with_metrics(StageMetrics {
            items_processed: report.objects + report.relations + report.facts,
            items_failed: report.embedding_skipped,
            duration_ms: start.elapsed().as_millis() as u64,
            errors: Vec::new(),
        });
        output.insert("graph_sync", &report);
        Ok(output)
    }
}
