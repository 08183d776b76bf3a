//! Stage-level pipeline events
//!
//! Published on a `tokio::sync::broadcast` channel; slow subscribers lag and
//! drop events rather than blocking the orchestrator.

use ontograph_storage::{DocumentId, ExecutionId, ExecutionStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::StageId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        document_id: DocumentId,
    },
    StageStarted {
        execution_id: ExecutionId,
        stage: StageId,
    },
    StageCompleted {
        execution_id: ExecutionId,
        stage: StageId,
        duration_ms: u64,
    },
    StageFailed {
        execution_id: ExecutionId,
        stage: StageId,
        retryable: bool,
        message: String,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
