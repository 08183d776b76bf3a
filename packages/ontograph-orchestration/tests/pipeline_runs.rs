//! Integration tests for the orchestrator
//!
//! Scripted stage units record when they ran so group ordering, failure
//! handling, cancellation and timeouts can be checked against the persisted
//! execution row.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ontograph_core::config::PipelineConfig;
use ontograph_orchestration::{
    ExecutionContext, Orchestrator, OrchestratorError, PipelineDAG, PipelineEvent, Result,
    StageFailure, StageHandler, StageId, StageOutput,
};
use ontograph_storage::{ExecutionStatus, ExecutionStore, SqliteStore};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct Timeline {
    spans: Mutex<Vec<(StageId, Instant, Instant)>>,
}

impl Timeline {
    fn span(&self, stage: StageId) -> (Instant, Instant) {
        let spans = self.spans.lock().unwrap();
        let (_, start, end) = spans.iter().find(|(s, _, _)| *s == stage).unwrap();
        (*start, *end)
    }
}

enum Behavior {
    Succeed,
    Fail { retryable: bool },
    Sleep(Duration),
}

struct Scripted {
    stage: StageId,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    timeline: Arc<Timeline>,
}

impl Scripted {
    fn new(stage: StageId, behavior: Behavior, timeline: &Arc<Timeline>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            timeline: Arc::clone(timeline),
        })
    }
}

#[async_trait]
impl StageHandler for Scripted {
    fn stage_id(&self) -> StageId {
        self.stage
    }

    async fn execute(&self, _ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let result = match &self.behavior {
            Behavior::Succeed => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let mut output = StageOutput::default();
                output.insert(self.stage.as_str(), "done");
                Ok(output)
            }
            Behavior::Fail { retryable } => Err(OrchestratorError::StageFailed(StageFailure::new(
                self.stage,
                *retryable,
                format!("{} exploded", self.stage),
            ))),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(StageOutput::default())
            }
        };
        self.timeline
            .spans
            .lock()
            .unwrap()
            .push((self.stage, start, Instant::now()));
        result
    }
}

fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

fn config() -> PipelineConfig {
    PipelineConfig {
        stage_timeout_ms: 5_000,
        max_parallel_stages: 4,
        error_message_limit: 200,
    }
}

#[tokio::test]
async fn test_groups_run_in_order() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[
        (StageId::Parse, 0),
        (StageId::Chunk, 1),
        (StageId::LlmProcess, 2),
        (StageId::Vectorize, 2),
        (StageId::ExtractOntology, 3),
    ])
    .unwrap();
    let mut orch = Orchestrator::new(dag, store(), config());
    for stage in [
        StageId::Parse,
        StageId::Chunk,
        StageId::LlmProcess,
        StageId::Vectorize,
        StageId::ExtractOntology,
    ] {
        orch.register_handler(Scripted::new(stage, Behavior::Succeed, &timeline));
    }

    let ctx = orch.execute(1, 10).await.unwrap();
    assert_eq!(ctx.status(), ExecutionStatus::Completed);

    let (_, chunk_end) = timeline.span(StageId::Chunk);
    let (llm_start, llm_end) = timeline.span(StageId::LlmProcess);
    let (vec_start, vec_end) = timeline.span(StageId::Vectorize);
    let (extract_start, _) = timeline.span(StageId::ExtractOntology);

    assert!(llm_start >= chunk_end);
    assert!(vec_start >= chunk_end);
    assert!(extract_start >= llm_end);
    assert!(extract_start >= vec_end);

    assert_eq!(ctx.get::<String>("VECTORIZE").as_deref(), Some("done"));
}

#[tokio::test]
async fn test_non_retryable_chunk_failure_stops_run() {
    let store = store();
    let timeline = Arc::new(Timeline::default());
    let llm = Scripted::new(StageId::LlmProcess, Behavior::Succeed, &timeline);
    let llm_calls = Arc::clone(&llm.calls);

    let orch = Orchestrator::with_default_pipeline(store.clone(), config())
        .unwrap()
        .with_handler(Scripted::new(StageId::Parse, Behavior::Succeed, &timeline))
        .with_handler(Scripted::new(
            StageId::Chunk,
            Behavior::Fail { retryable: false },
            &timeline,
        ))
        .with_handler(llm)
        .with_handler(Scripted::new(StageId::Vectorize, Behavior::Succeed, &timeline))
        .with_handler(Scripted::new(StageId::ExtractOntology, Behavior::Succeed, &timeline))
        .with_handler(Scripted::new(StageId::GraphSync, Behavior::Succeed, &timeline));

    let ctx = orch.execute(1, 20).await.unwrap();
    assert_eq!(ctx.status(), ExecutionStatus::Failed);
    assert_eq!(ctx.execution.current_stage.as_deref(), Some("CHUNK"));
    assert_eq!(llm_calls.load(Ordering::SeqCst), 0);

    let failure = ctx.failure.unwrap();
    assert_eq!(failure.stage, StageId::Chunk);
    assert!(!failure.retryable);

    let persisted = store.latest_execution_for_document(20).await.unwrap().unwrap();
    assert_eq!(persisted.status, ExecutionStatus::Failed);
    assert_eq!(persisted.current_stage.as_deref(), Some("CHUNK"));
    assert!(persisted.error_message.unwrap().contains("CHUNK exploded"));
    assert!(persisted.end_time.is_some());
}

#[tokio::test]
async fn test_parallel_failure_waits_for_siblings() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[
        (StageId::Parse, 0),
        (StageId::LlmProcess, 1),
        (StageId::Vectorize, 1),
        (StageId::ExtractOntology, 2),
    ])
    .unwrap();

    let finished = Arc::new(AtomicBool::new(false));
    struct SlowSibling(Arc<AtomicBool>);

    #[async_trait]
    impl StageHandler for SlowSibling {
        fn stage_id(&self) -> StageId {
            StageId::Vectorize
        }

        async fn execute(&self, _ctx: Arc<ExecutionContext>) -> Result<StageOutput> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.store(true, Ordering::SeqCst);
            Ok(StageOutput::default())
        }
    }

    let extract = Scripted::new(StageId::ExtractOntology, Behavior::Succeed, &timeline);
    let extract_calls = Arc::clone(&extract.calls);
    let orch = Orchestrator::new(dag, store(), config())
        .with_handler(Scripted::new(StageId::Parse, Behavior::Succeed, &timeline))
        .with_handler(Scripted::new(
            StageId::LlmProcess,
            Behavior::Fail { retryable: true },
            &timeline,
        ))
        .with_handler(Arc::new(SlowSibling(Arc::clone(&finished))))
        .with_handler(extract);

    let ctx = orch.execute(1, 30).await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.status(), ExecutionStatus::Failed);
    assert_eq!(ctx.execution.current_stage.as_deref(), Some("LLM_PROCESS"));
    assert!(ctx.failure.unwrap().retryable);
}

#[tokio::test]
async fn test_two_failures_in_one_group_are_aggregated() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[(StageId::LlmProcess, 0), (StageId::Vectorize, 0)]).unwrap();
    let orch = Orchestrator::new(dag, store(), config())
        .with_handler(Scripted::new(
            StageId::LlmProcess,
            Behavior::Fail { retryable: true },
            &timeline,
        ))
        .with_handler(Scripted::new(
            StageId::Vectorize,
            Behavior::Fail { retryable: false },
            &timeline,
        ));

    let ctx = orch.execute(1, 31).await.unwrap();
    assert_eq!(ctx.status(), ExecutionStatus::Failed);
    let message = ctx.execution.error_message.unwrap();
    assert!(message.contains("2 stages failed"));
    assert_eq!(ctx.failure.unwrap().stage, StageId::LlmProcess);
}

#[tokio::test]
async fn test_cancel_stops_at_group_boundary() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[(StageId::Parse, 0), (StageId::Chunk, 1)]).unwrap();
    let chunk = Scripted::new(StageId::Chunk, Behavior::Succeed, &timeline);
    let chunk_calls = Arc::clone(&chunk.calls);
    let orch = Arc::new(
        Orchestrator::new(dag, store(), config())
            .with_handler(Scripted::new(
                StageId::Parse,
                Behavior::Sleep(Duration::from_millis(200)),
                &timeline,
            ))
            .with_handler(chunk),
    );

    let handle = orch.execute_async(1, 40);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orch.is_running(40));
    assert!(orch.cancel(40));

    let ctx = handle.await.unwrap().unwrap();
    assert_eq!(ctx.status(), ExecutionStatus::Cancelled);
    assert_eq!(chunk_calls.load(Ordering::SeqCst), 0);
    assert!(!orch.is_running(40));
}

#[tokio::test]
async fn test_overlapping_runs_of_one_document_stay_cancellable() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[(StageId::Parse, 0), (StageId::Chunk, 1)]).unwrap();
    let store = store();
    let orch = Arc::new(
        Orchestrator::new(dag, store.clone(), config())
            .with_handler(Scripted::new(
                StageId::Parse,
                Behavior::Sleep(Duration::from_millis(300)),
                &timeline,
            ))
            .with_handler(Scripted::new(StageId::Chunk, Behavior::Succeed, &timeline)),
    );

    let first = orch.execute_async(1, 45);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = orch.execute_async(1, 45);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), ExecutionStatus::Completed);

    // The second run is still inside PARSE
    assert!(orch.is_running(45));
    assert!(orch.cancel(45));

    let second = second.await.unwrap().unwrap();
    assert_eq!(second.status(), ExecutionStatus::Cancelled);
    assert!(!orch.is_running(45));

    let latest = store.latest_execution_for_document(45).await.unwrap().unwrap();
    assert_eq!(latest.id, second.execution.id);
    assert_eq!(latest.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_stage_timeout_is_retryable_failure() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[(StageId::Parse, 0)]).unwrap();
    let orch = Orchestrator::new(
        dag,
        store(),
        PipelineConfig {
            stage_timeout_ms: 50,
            ..config()
        },
    )
    .with_handler(Scripted::new(
        StageId::Parse,
        Behavior::Sleep(Duration::from_secs(10)),
        &timeline,
    ));

    let started = Instant::now();
    let ctx = orch.execute(1, 50).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(ctx.status(), ExecutionStatus::Failed);

    let failure = ctx.failure.unwrap();
    assert_eq!(failure.stage, StageId::Parse);
    assert!(failure.retryable);
    assert!(failure.message.contains("timed out"));
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let timeline = Arc::new(Timeline::default());
    let dag = PipelineDAG::from_orders(&[(StageId::Parse, 0)]).unwrap();
    let orch = Orchestrator::new(dag, store(), config())
        .with_handler(Scripted::new(StageId::Parse, Behavior::Succeed, &timeline));
    let mut events = orch.subscribe();

    orch.execute(1, 60).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(PipelineEvent::ExecutionStarted { document_id: 60, .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::StageCompleted { stage: StageId::Parse, .. })));
    assert!(matches!(
        seen.last(),
        Some(PipelineEvent::ExecutionFinished {
            status: ExecutionStatus::Completed,
            ..
        })
    ));
}
