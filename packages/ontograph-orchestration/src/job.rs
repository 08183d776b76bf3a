use chrono::Utc;
use ontograph_storage::{ExecutionStatus, PipelineExecution};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageId {
    Parse,
    Chunk,
    LlmProcess,
    Vectorize,
    ExtractOntology,
    GraphSync,
}

impl StageId {
    pub const ALL: [StageId; 6] = [
        StageId::Parse,
        StageId::Chunk,
        StageId::LlmProcess,
        StageId::Vectorize,
        StageId::ExtractOntology,
        StageId::GraphSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Parse => "PARSE",
            StageId::Chunk => "CHUNK",
            StageId::LlmProcess => "LLM_PROCESS",
            StageId::Vectorize => "VECTORIZE",
            StageId::ExtractOntology => "EXTRACT_ONTOLOGY",
            StageId::GraphSync => "GRAPH_SYNC",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        StageId::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| OrchestratorError::parse(format!("Invalid stage ID: {}", s)))
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cut `message` to at most `limit` chars, on a char boundary
pub fn truncate_message(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Stage label of a group: `CHUNK`, or `LLM_PROCESS,VECTORIZE` for parallel units
pub fn group_label(group: &[StageId]) -> String {
    group
        .iter()
        .map(StageId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// PENDING → PROCESSING → {COMPLETED | FAILED | CANCELLED}
pub struct ExecutionStateMachine {
    execution: PipelineExecution,
}

impl ExecutionStateMachine {
    pub fn new(execution: PipelineExecution) -> Self {
        Self { execution }
    }

    pub fn execution(&self) -> &PipelineExecution {
        &self.execution
    }

    pub fn into_execution(self) -> PipelineExecution {
        self.execution
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.execution.status.as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition: PENDING → PROCESSING
    pub fn start(&mut self, current_stage: &str) -> Result<()> {
        if self.execution.status != ExecutionStatus::Pending {
            return Err(self.invalid("PROCESSING"));
        }
        self.execution.status = ExecutionStatus::Processing;
        self.execution.current_stage = Some(current_stage.to_string());
        self.execution.start_time = Some(Utc::now());
        self.execution.progress = 0;
        Ok(())
    }

    /// Update stage label and progress of a processing run
    pub fn update_stage(&mut self, current_stage: &str, progress: u8) -> Result<()> {
        if self.execution.status != ExecutionStatus::Processing {
            return Err(self.invalid("update_stage"));
        }
        self.execution.current_stage = Some(current_stage.to_string());
        self.execution.progress = progress.min(100);
        Ok(())
    }

    /// Transition: PROCESSING → COMPLETED
    pub fn complete(&mut self) -> Result<()> {
        if self.execution.status != ExecutionStatus::Processing {
            return Err(self.invalid("COMPLETED"));
        }
        self.execution.status = ExecutionStatus::Completed;
        self.execution.progress = 100;
        self.execution.end_time = Some(Utc::now());
        Ok(())
    }

    /// Transition: PROCESSING → FAILED, recording the failing stage
    pub fn fail(&mut self, failed_stage: &str, error: &str, limit: usize) -> Result<()> {
        if self.execution.status != ExecutionStatus::Processing {
            return Err(self.invalid("FAILED"));
        }
        self.execution.status = ExecutionStatus::Failed;
        self.execution.current_stage = Some(failed_stage.to_string());
        self.execution.error_message = Some(truncate_message(error, limit));
        self.execution.end_time = Some(Utc::now());
        Ok(())
    }

    /// Transition: * → CANCELLED
    pub fn cancel(&mut self, reason: &str, limit: usize) -> Result<()> {
        if self.execution.status.is_terminal() {
            return Err(self.invalid("CANCELLED"));
        }
        self.execution.status = ExecutionStatus::Cancelled;
        self.execution.error_message = Some(truncate_message(reason, limit));
        self.execution.end_time = Some(Utc::now());
        Ok(())
    }
}
