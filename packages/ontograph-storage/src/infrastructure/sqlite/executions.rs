use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, to_millis, SqliteStore};
use crate::domain::models::{DocumentId, ExecutionId, PipelineExecution};
use crate::domain::ports::ExecutionStore;
use crate::error::{Result, StorageError};

const EXECUTION_COLUMNS: &str = "id, workspace_id, document_id, status, current_stage, progress, \
     start_time, end_time, error_message";

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<PipelineExecution> {
    let start_time: Option<i64> = row.get(6)?;
    let end_time: Option<i64> = row.get(7)?;
    Ok(PipelineExecution {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        document_id: row.get(2)?,
        status: row.get(3)?,
        current_stage: row.get(4)?,
        progress: row.get(5)?,
        start_time: start_time.map(from_millis),
        end_time: end_time.map(from_millis),
        error_message: row.get(8)?,
    })
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_execution(&self, execution: &PipelineExecution) -> Result<PipelineExecution> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pipeline_execution
                (workspace_id, document_id, status, current_stage, progress, start_time, end_time, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                execution.workspace_id,
                execution.document_id,
                execution.status,
                execution.current_stage,
                execution.progress,
                execution.start_time.map(to_millis),
                execution.end_time.map(to_millis),
                execution.error_message,
            ],
        )?;
        let mut stored = execution.clone();
        stored.id = conn.last_insert_rowid();
        Ok(stored)
    }

    async fn update_execution(&self, execution: &PipelineExecution) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE pipeline_execution
             SET status = ?1, current_stage = ?2, progress = ?3, start_time = ?4,
                 end_time = ?5, error_message = ?6
             WHERE id = ?7",
            params![
                execution.status,
                execution.current_stage,
                execution.progress,
                execution.start_time.map(to_millis),
                execution.end_time.map(to_millis),
                execution.error_message,
                execution.id,
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::not_found(format!(
                "pipeline_execution#{}",
                execution.id
            )));
        }
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Option<PipelineExecution>> {
        let conn = self.conn.lock();
        let execution = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM pipeline_execution WHERE id = ?1"),
                params![id],
                execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }

    async fn latest_execution_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<PipelineExecution>> {
        let conn = self.conn.lock();
        let execution = conn
            .query_row(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM pipeline_execution
                     WHERE document_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![document_id],
                execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }
}
