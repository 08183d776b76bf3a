use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use ontograph_core::config::PipelineConfig;
use ontograph_storage::{
    DocumentId, ExecutionId, ExecutionStatus, ExecutionStore, PipelineExecution, WorkspaceId,
};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dag::PipelineDAG;
use crate::error::{OrchestratorError, Result, StageFailure};
use crate::events::{EventBus, PipelineEvent};
use crate::job::{group_label, ExecutionStateMachine, StageId};
use crate::pipeline::{ExecutionContext, StageHandler, StageOutput};

/// Runs the stage DAG for one document at a time per call
///
/// Groups run strictly in plan order. Units of one group run concurrently
/// (bounded by `max_parallel_stages`) and are always all awaited before the
/// group's outcome is decided. The execution row is written at creation, at
/// every group boundary and at the terminal state.
pub struct Orchestrator {
    dag: Arc<PipelineDAG>,
    handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    executions: Arc<dyn ExecutionStore>,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
    events: EventBus,
    /// In-flight runs per document; one document may have several
    running: DashMap<DocumentId, Vec<(ExecutionId, CancellationToken)>>,
}

impl Orchestrator {
    pub fn new(
        dag: PipelineDAG,
        executions: Arc<dyn ExecutionStore>,
        config: PipelineConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_stages.max(1)));
        Self {
            dag: Arc::new(dag),
            handlers: HashMap::new(),
            executions,
            config,
            permits,
            events: EventBus::default(),
            running: DashMap::new(),
        }
    }

    pub fn with_default_pipeline(
        executions: Arc<dyn ExecutionStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        Ok(Self::new(PipelineDAG::default_pipeline()?, executions, config))
    }

    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage_id(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.register_handler(handler);
        self
    }

    pub fn dag(&self) -> &PipelineDAG {
        &self.dag
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Every stage of the plan has a handler
    pub fn validate(&self) -> Result<()> {
        match self.dag.stage_ids().find(|id| !self.handlers.contains_key(id)) {
            Some(missing) => Err(OrchestratorError::MissingHandler(missing)),
            None => Ok(()),
        }
    }

    pub fn is_running(&self, document_id: DocumentId) -> bool {
        self.running.contains_key(&document_id)
    }

    /// Request cancellation of every running execution of the document
    ///
    /// Takes effect at the next group boundary; returns `false` when nothing runs.
    pub fn cancel(&self, document_id: DocumentId) -> bool {
        match self.running.get(&document_id) {
            Some(runs) if !runs.is_empty() => {
                for (_, token) in runs.iter() {
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    fn release(&self, document_id: DocumentId, execution_id: ExecutionId) {
        if let Some(mut runs) = self.running.get_mut(&document_id) {
            runs.retain(|(id, _)| *id != execution_id);
        }
        self.running.remove_if(&document_id, |_, runs| runs.is_empty());
    }

    /// Spawn [`Orchestrator::execute`] on the runtime
    pub fn execute_async(
        self: &Arc<Self>,
        workspace_id: WorkspaceId,
        document_id: DocumentId,
    ) -> JoinHandle<Result<ExecutionContext>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.execute(workspace_id, document_id).await })
    }

    /// Run the whole plan for one document
    ///
    /// Stage failures end the run as FAILED and still return `Ok` with the
    /// failure recorded in the context; `Err` means the run could not be
    /// started or its state could not be persisted.
    pub async fn execute(
        &self,
        workspace_id: WorkspaceId,
        document_id: DocumentId,
    ) -> Result<ExecutionContext> {
        self.validate()?;
        let start = Instant::now();

        let execution = self
            .executions
            .create_execution(&PipelineExecution::pending(workspace_id, document_id))
            .await?;
        let execution_id = execution.id;
        info!(
            execution_id,
            workspace_id,
            document_id,
            "Starting pipeline execution\n{}",
            self.dag.execution_plan()
        );

        let token = CancellationToken::new();
        self.running
            .entry(document_id)
            .or_default()
            .push((execution_id, token.clone()));

        let mut ctx = ExecutionContext::new(execution);
        let outcome = self.run(&mut ctx, &token).await;
        self.release(document_id, execution_id);

        let mut sm = ExecutionStateMachine::new(ctx.execution.clone());
        let limit = self.config.error_message_limit;
        match outcome {
            Ok(()) => {
                sm.complete()?;
                info!(
                    execution_id,
                    document_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Pipeline execution completed"
                );
            }
            Err(OrchestratorError::Cancelled(_)) => {
                if sm.execution().status == ExecutionStatus::Pending {
                    sm.start("")?;
                }
                sm.cancel("cancelled by request", limit)?;
                warn!(execution_id, document_id, "Pipeline execution cancelled");
            }
            Err(err) => {
                let failures = err.stage_failures();
                let failed_stage = match failures.first() {
                    Some(first) => first.stage.as_str().to_string(),
                    None => ctx.execution.current_stage.clone().unwrap_or_default(),
                };
                if sm.execution().status == ExecutionStatus::Pending {
                    sm.start(&failed_stage)?;
                }
                sm.fail(&failed_stage, &err.to_string(), limit)?;
                error!(
                    execution_id,
                    document_id,
                    stage = %failed_stage,
                    error = %err,
                    "Pipeline execution failed"
                );
                ctx.failure = failures.into_iter().next().or_else(|| {
                    StageId::parse(&failed_stage)
                        .ok()
                        .map(|stage| StageFailure::new(stage, err.category().is_retryable(), err.to_string()))
                });
            }
        }

        ctx.execution = sm.into_execution();
        self.executions.update_execution(&ctx.execution).await?;
        self.events.publish(PipelineEvent::ExecutionFinished {
            execution_id,
            status: ctx.execution.status,
        });
        Ok(ctx)
    }

    async fn run(&self, ctx: &mut ExecutionContext, token: &CancellationToken) -> Result<()> {
        let execution_id = ctx.execution.id;
        let document_id = ctx.document_id();
        let total = self.dag.len().max(1);
        let mut finished = 0usize;

        let mut sm = ExecutionStateMachine::new(ctx.execution.clone());
        let first_label = self
            .dag
            .execution_order()
            .first()
            .map(|group| group_label(group))
            .unwrap_or_default();
        sm.start(&first_label)?;
        ctx.execution = sm.into_execution();
        self.executions.update_execution(&ctx.execution).await?;
        self.events.publish(PipelineEvent::ExecutionStarted {
            execution_id,
            document_id,
        });

        for (phase, group) in self.dag.execution_order().iter().enumerate() {
            if token.is_cancelled() {
                return Err(OrchestratorError::Cancelled(document_id));
            }

            let label = group_label(group);
            let mut sm = ExecutionStateMachine::new(ctx.execution.clone());
            sm.update_stage(&label, progress(finished, total))?;
            ctx.execution = sm.into_execution();
            self.executions.update_execution(&ctx.execution).await?;
            info!(
                execution_id,
                phase = phase + 1,
                stages = %label,
                parallel = group.len() > 1,
                "Running stage group"
            );

            let results = self.run_group(group, Arc::new(ctx.clone())).await;

            let mut failures = Vec::new();
            for (stage, result) in group.iter().copied().zip(results) {
                match result {
                    Ok(output) => ctx.merge(&output),
                    Err(failure) => {
                        error!(
                            execution_id,
                            stage = %stage,
                            retryable = failure.retryable,
                            error = %failure.message,
                            "Stage failed"
                        );
                        failures.push(failure);
                    }
                }
            }
            match failures.len() {
                0 => {}
                1 => {
                    let failure = failures.remove(0);
                    return Err(OrchestratorError::StageFailed(failure));
                }
                _ => return Err(OrchestratorError::AggregateFailure(failures)),
            }

            finished += group.len();
            let mut sm = ExecutionStateMachine::new(ctx.execution.clone());
            sm.update_stage(&label, progress(finished, total))?;
            ctx.execution = sm.into_execution();
            self.executions.update_execution(&ctx.execution).await?;
        }
        Ok(())
    }

    /// Run every unit of `group` and wait for all of them, in group order
    async fn run_group(
        &self,
        group: &[StageId],
        snapshot: Arc<ExecutionContext>,
    ) -> Vec<std::result::Result<StageOutput, StageFailure>> {
        let execution_id = snapshot.execution.id;
        let mut tasks = Vec::with_capacity(group.len());
        for &stage in group {
            let handler = self.handlers.get(&stage).cloned();
            let timeout_ms = self
                .dag
                .get_stage(stage)
                .and_then(|node| node.timeout_ms)
                .unwrap_or(self.config.stage_timeout_ms);
            let permits = Arc::clone(&self.permits);
            let events = self.events.clone();
            let snapshot = Arc::clone(&snapshot);

            tasks.push(tokio::spawn(async move {
                let Some(handler) = handler else {
                    return Err(StageFailure::permanent(
                        stage,
                        OrchestratorError::MissingHandler(stage).to_string(),
                    ));
                };
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| StageFailure::permanent(stage, e.to_string()))?;

                events.publish(PipelineEvent::StageStarted {
                    execution_id,
                    stage,
                });
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(Duration::from_millis(timeout_ms), handler.execute(snapshot))
                        .await;
                let result = match outcome {
                    Ok(Ok(mut output)) => {
                        output.metrics.duration_ms = started.elapsed().as_millis() as u64;
                        Ok(output)
                    }
                    Ok(Err(e)) => Err(StageFailure::from_error(stage, e)),
                    Err(_) => Err(StageFailure::from_error(
                        stage,
                        OrchestratorError::Timeout { stage, timeout_ms },
                    )),
                };

                match &result {
                    Ok(output) => events.publish(PipelineEvent::StageCompleted {
                        execution_id,
                        stage,
                        duration_ms: output.metrics.duration_ms,
                    }),
                    Err(failure) => events.publish(PipelineEvent::StageFailed {
                        execution_id,
                        stage,
                        retryable: failure.retryable,
                        message: failure.message.clone(),
                    }),
                }
                result
            }));
        }

        join_all(tasks)
            .await
            .into_iter()
            .zip(group)
            .map(|(joined, &stage)| match joined {
                Ok(result) => result,
                Err(join_err) => Err(StageFailure::permanent(
                    stage,
                    format!("stage task panicked: {join_err}"),
                )),
            })
            .collect()
    }
}

fn progress(finished: usize, total: usize) -> u8 {
    ((finished * 100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ontograph_storage::SqliteStore;

    struct Noop(StageId);

    #[async_trait]
    impl StageHandler for Noop {
        fn stage_id(&self) -> StageId {
            self.0
        }

        async fn execute(&self, _ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
            let mut output = StageOutput::default();
            output.insert(self.0.as_str(), true);
            Ok(output)
        }
    }

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    #[test]
    fn test_progress() {
        assert_eq!(progress(0, 6), 0);
        assert_eq!(progress(3, 6), 50);
        assert_eq!(progress(6, 6), 100);
    }

    #[tokio::test]
    async fn test_missing_handler_is_rejected_before_any_write() {
        let store = store();
        let orch = Orchestrator::with_default_pipeline(store.clone(), PipelineConfig::default())
            .unwrap()
            .with_handler(Arc::new(Noop(StageId::Parse)));
        let err = orch.execute(1, 1).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingHandler(StageId::Chunk)));
        assert!(store.latest_execution_for_document(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_run_merges_metadata() {
        let dag = PipelineDAG::from_orders(&[(StageId::Parse, 0), (StageId::Chunk, 1)]).unwrap();
        let orch = Orchestrator::new(dag, store(), PipelineConfig::default())
            .with_handler(Arc::new(Noop(StageId::Parse)))
            .with_handler(Arc::new(Noop(StageId::Chunk)));

        let ctx = orch.execute(1, 4).await.unwrap();
        assert_eq!(ctx.status(), ExecutionStatus::Completed);
        assert_eq!(ctx.execution.progress, 100);
        assert_eq!(ctx.get::<bool>("PARSE"), Some(true));
        assert_eq!(ctx.get::<bool>("CHUNK"), Some(true));
        assert!(!orch.is_running(4));
    }

    #[test]
    fn test_cancel_unknown_document() {
        let orch = Orchestrator::with_default_pipeline(store(), PipelineConfig::default()).unwrap();
        assert!(!orch.cancel(42));
    }
}
