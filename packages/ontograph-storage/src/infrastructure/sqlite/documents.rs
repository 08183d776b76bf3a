use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, to_millis, SqliteStore};
use crate::domain::models::{
    ChunkId, ChunkStatus, Document, DocumentChunk, DocumentId, NewChunk, WorkspaceId,
};
use crate::domain::ports::DocumentStore;
use crate::error::{Result, StorageError};

const CHUNK_COLUMNS: &str = "id, document_id, workspace_id, seq, content, content_hash, \
     extraction_status, extraction_payload, ontology_status, embedding, error_message, updated_at";

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentChunk> {
    let embedding: Option<String> = row.get(9)?;
    let embedding = embedding
        .map(|raw| serde_json::from_str::<Vec<f64>>(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(DocumentChunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        workspace_id: row.get(2)?,
        seq: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        extraction_status: row.get(6)?,
        extraction_payload: row.get(7)?,
        ontology_status: row.get(8)?,
        embedding,
        error_message: row.get(10)?,
        updated_at: from_millis(row.get(11)?),
    })
}

fn ensure_updated(updated: usize, chunk_id: ChunkId) -> Result<()> {
    if updated == 0 {
        return Err(StorageError::not_found(format!("document_chunk#{}", chunk_id)));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(
        &self,
        workspace_id: WorkspaceId,
        title: &str,
        content: &str,
    ) -> Result<Document> {
        let conn = self.conn.lock();
        let now = from_millis(to_millis(Utc::now()));
        conn.execute(
            "INSERT INTO document (workspace_id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![workspace_id, title, content, to_millis(now)],
        )?;
        Ok(Document {
            id: conn.last_insert_rowid(),
            workspace_id,
            title: title.to_string(),
            content: content.to_string(),
            parsed_content: None,
            created_at: now,
        })
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let document = conn
            .query_row(
                "SELECT id, workspace_id, title, content, parsed_content, created_at
                 FROM document WHERE id = ?1",
                params![document_id],
                |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        title: row.get(2)?,
                        content: row.get(3)?,
                        parsed_content: row.get(4)?,
                        created_at: from_millis(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(document)
    }

    async fn save_parsed_content(&self, document_id: DocumentId, parsed: &str) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE document SET parsed_content = ?1 WHERE id = ?2",
            params![parsed, document_id],
        )?;
        if updated == 0 {
            return Err(StorageError::not_found(format!("document#{}", document_id)));
        }
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[NewChunk],
    ) -> Result<Vec<DocumentChunk>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let workspace_id: WorkspaceId = tx
            .query_row(
                "SELECT workspace_id FROM document WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found(format!("document#{}", document_id)))?;

        tx.execute(
            "DELETE FROM document_chunk WHERE document_id = ?1",
            params![document_id],
        )?;

        let now = to_millis(Utc::now());
        {
            let mut insert = tx.prepare(
                "INSERT INTO document_chunk (document_id, workspace_id, seq, content, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                insert.execute(params![
                    document_id,
                    workspace_id,
                    chunk.seq,
                    chunk.content,
                    chunk.content_hash(),
                    now,
                ])?;
            }
        }

        let stored = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM document_chunk WHERE document_id = ?1 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map(params![document_id], chunk_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        tx.commit()?;
        Ok(stored)
    }

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<DocumentChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunk WHERE document_id = ?1 ORDER BY seq"
        ))?;
        let chunks = stmt
            .query_map(params![document_id], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    async fn update_chunk_extraction(
        &self,
        chunk_id: ChunkId,
        status: ChunkStatus,
        payload: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE document_chunk
             SET extraction_status = ?1, extraction_payload = COALESCE(?2, extraction_payload),
                 error_message = ?3, updated_at = ?4
             WHERE id = ?5",
            params![status, payload, error_message, to_millis(Utc::now()), chunk_id],
        )?;
        ensure_updated(updated, chunk_id)
    }

    async fn update_chunk_ontology(
        &self,
        chunk_id: ChunkId,
        status: ChunkStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE document_chunk
             SET ontology_status = ?1, error_message = COALESCE(?2, error_message), updated_at = ?3
             WHERE id = ?4",
            params![status, error_message, to_millis(Utc::now()), chunk_id],
        )?;
        ensure_updated(updated, chunk_id)
    }

    async fn save_chunk_embedding(&self, chunk_id: ChunkId, embedding: &[f64]) -> Result<()> {
        let encoded = serde_json::to_string(embedding)?;
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE document_chunk SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
            params![encoded, to_millis(Utc::now()), chunk_id],
        )?;
        ensure_updated(updated, chunk_id)
    }
}
