use ontograph_core::OntologyError;
use ontograph_storage::{DocumentId, ErrorKind, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::StageId;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A stage unit that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageId,
    /// Surfaced to the caller; the orchestrator never retries on its own
    pub retryable: bool,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: StageId, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            stage,
            retryable,
            message: message.into(),
        }
    }

    pub fn permanent(stage: StageId, message: impl Into<String>) -> Self {
        Self::new(stage, false, message)
    }

    pub fn retryable(stage: StageId, message: impl Into<String>) -> Self {
        Self::new(stage, true, message)
    }

    /// Attribute `err` to `stage`, keeping an explicit failure as-is
    pub fn from_error(stage: StageId, err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::StageFailed(failure) => failure,
            other => Self::new(stage, other.category().is_retryable(), other.to_string()),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.retryable { "retryable" } else { "permanent" };
        write!(f, "Stage {} failed ({}): {}", self.stage, kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("{0}")]
    StageFailed(StageFailure),

    #[error("{} stages failed in one group: {}", .0.len(), join_failures(.0))]
    AggregateFailure(Vec<StageFailure>),

    #[error("DAG cycle detected")]
    DagCycleDetected,

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("No handler registered for stage {0}")]
    MissingHandler(StageId),

    #[error("Stage {stage} timed out after {timeout_ms}ms")]
    Timeout { stage: StageId, timeout_ms: u64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Execution for document {0} was cancelled")]
    Cancelled(DocumentId),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.stage, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Storage(e) => match e.kind {
                ErrorKind::NotFound | ErrorKind::Serialization | ErrorKind::Config => {
                    ErrorCategory::Permanent
                }
                ErrorKind::Conflict => ErrorCategory::Transient,
                _ => ErrorCategory::Infrastructure,
            },
            OrchestratorError::Ontology(e) if e.is_retryable() => ErrorCategory::Transient,
            OrchestratorError::StageFailed(f) if f.retryable => ErrorCategory::Transient,
            OrchestratorError::AggregateFailure(failures)
                if failures.iter().all(|f| f.retryable) =>
            {
                ErrorCategory::Transient
            }
            OrchestratorError::Timeout { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }

    /// Failures carried by this error, in group order
    pub fn stage_failures(&self) -> Vec<StageFailure> {
        match self {
            OrchestratorError::StageFailed(f) => vec![f.clone()],
            OrchestratorError::AggregateFailure(failures) => failures.clone(),
            OrchestratorError::Timeout { stage, .. } => {
                vec![StageFailure::retryable(*stage, self.to_string())]
            }
            _ => Vec::new(),
        }
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Transient error - a later run may succeed (timeout, backend 5xx)
    Transient,
    /// Permanent error - input must change first (missing document, bad payload)
    Permanent,
    /// Infrastructure error - the store itself is unhealthy
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
