//! SQLite Store
//!
//! File-based persistent storage using SQLite. One connection guarded by a
//! mutex; every multi-statement operation runs inside a transaction.
//! `in_memory()` backs the test suites.

mod documents;
mod executions;
mod ontology;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::domain::models::{ChunkStatus, EntryStatus, EvidenceLevel, ExecutionStatus, Language};
use crate::error::Result;

/// SQLite-backed implementation of every storage port
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!(path = %db_path.as_ref().display(), "Opened SQLite store");
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        for dict in ["object_dict", "relation_dict"] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {dict} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL,
                    category TEXT NOT NULL,
                    term_en TEXT NOT NULL,
                    term_ko TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    created_at INTEGER NOT NULL,
                    UNIQUE (workspace_id, category, term_en),
                    UNIQUE (workspace_id, category, term_ko)
                );"
            ))?;
        }

        for (synonyms, dict) in [
            ("object_synonyms", "object_dict"),
            ("relation_synonyms", "relation_dict"),
        ] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {synonyms} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    workspace_id INTEGER NOT NULL,
                    category TEXT NOT NULL,
                    synonym TEXT NOT NULL,
                    target_id INTEGER NOT NULL REFERENCES {dict}(id),
                    language TEXT NOT NULL,
                    UNIQUE (workspace_id, category, synonym)
                );
                CREATE INDEX IF NOT EXISTS idx_{synonyms}_target ON {synonyms}(target_id);"
            ))?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fact (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL,
                subject_id INTEGER NOT NULL REFERENCES object_dict(id),
                relation_id INTEGER NOT NULL REFERENCES relation_dict(id),
                object_id INTEGER NOT NULL REFERENCES object_dict(id),
                confidence REAL NOT NULL DEFAULT 1.0,
                evidence_level TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (workspace_id, subject_id, relation_id, object_id)
            );
            CREATE INDEX IF NOT EXISTS idx_fact_subject ON fact(subject_id);
            CREATE INDEX IF NOT EXISTS idx_fact_relation ON fact(relation_id);
            CREATE INDEX IF NOT EXISTS idx_fact_object ON fact(object_id);",
        )?;

        for (reference, target) in [
            ("object_reference", "object_dict"),
            ("relation_reference", "relation_dict"),
            ("fact_reference", "fact"),
        ] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {reference} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    target_id INTEGER NOT NULL REFERENCES {target}(id),
                    document_id INTEGER NOT NULL,
                    chunk_id INTEGER NOT NULL,
                    UNIQUE (target_id, document_id, chunk_id)
                );
                CREATE INDEX IF NOT EXISTS idx_{reference}_document ON {reference}(document_id);"
            ))?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS document (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                parsed_content TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS document_chunk (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES document(id),
                workspace_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                extraction_status TEXT NOT NULL DEFAULT 'PENDING',
                extraction_payload TEXT,
                ontology_status TEXT NOT NULL DEFAULT 'PENDING',
                embedding TEXT,
                error_message TEXT,
                updated_at INTEGER NOT NULL,
                UNIQUE (document_id, seq)
            );

            CREATE TABLE IF NOT EXISTS pipeline_execution (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER NOT NULL,
                document_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                current_stage TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                start_time INTEGER,
                end_time INTEGER,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pipeline_execution_document
                ON pipeline_execution(document_id);",
        )?;

        Ok(())
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// TEXT column mapping for the status/label enums
macro_rules! text_enum_sql {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let raw = value.as_str()?;
                    <$ty>::parse(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
                }
            }
        )*
    };
}

text_enum_sql!(EntryStatus, Language, EvidenceLevel, ChunkStatus, ExecutionStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ontograph.db");
        let _store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        // Reopening an existing file keeps the schema
        let _again = SqliteStore::open(&path).unwrap();
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = from_millis(to_millis(Utc::now()));
        assert_eq!(from_millis(to_millis(now)), now);
    }
}
