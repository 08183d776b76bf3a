//! `OntologyStore` for SQLite: dictionaries, synonyms, facts, references, sweep.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, to_millis, SqliteStore};
use crate::domain::models::{
    ChunkId, DictKind, DictionaryEntry, DocumentId, EntryId, Fact, NewDictionaryEntry, NewFact,
    NewSynonym, OntologySnapshot, ReferenceKind, ReferenceRow, Synonym, WorkspaceId,
};
use crate::domain::ports::OntologyStore;
use crate::error::Result;

const ENTRY_COLUMNS: &str =
    "id, workspace_id, category, term_en, term_ko, description, status, created_at";
const SYNONYM_COLUMNS: &str = "id, workspace_id, category, synonym, target_id, language";
const FACT_COLUMNS: &str =
    "id, workspace_id, subject_id, relation_id, object_id, confidence, evidence_level, created_at";

fn entry_from_row(kind: DictKind, row: &Row<'_>) -> rusqlite::Result<DictionaryEntry> {
    Ok(DictionaryEntry {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        kind,
        category: row.get(2)?,
        term_en: row.get(3)?,
        term_ko: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        created_at: from_millis(row.get(7)?),
    })
}

fn synonym_from_row(kind: DictKind, row: &Row<'_>) -> rusqlite::Result<Synonym> {
    Ok(Synonym {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        kind,
        category: row.get(2)?,
        synonym: row.get(3)?,
        target_id: row.get(4)?,
        language: row.get(5)?,
    })
}

fn fact_from_row(row: &Row<'_>) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        subject_id: row.get(2)?,
        relation_id: row.get(3)?,
        object_id: row.get(4)?,
        confidence: row.get(5)?,
        evidence_level: row.get(6)?,
        created_at: from_millis(row.get(7)?),
    })
}

/// Entry with zero references that no fact uses in a role of its kind
fn orphan_entry_predicate(kind: DictKind) -> String {
    let (table, reference, fact_use) = match kind {
        DictKind::Object => (
            "object_dict",
            "object_reference",
            "f.subject_id = d.id OR f.object_id = d.id",
        ),
        DictKind::Relation => ("relation_dict", "relation_reference", "f.relation_id = d.id"),
    };
    format!(
        "SELECT d.id FROM {table} d
         WHERE NOT EXISTS (SELECT 1 FROM {reference} r WHERE r.target_id = d.id)
           AND NOT EXISTS (SELECT 1 FROM fact f WHERE {fact_use})"
    )
}

impl SqliteStore {
    fn find_entry_by_column(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        column: &str,
        term: &str,
    ) -> Result<Option<DictionaryEntry>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} WHERE workspace_id = ?1 AND category = ?2 AND {column} = ?3",
            kind.dict_table()
        );
        let entry = conn
            .query_row(&sql, params![workspace_id, category, term], |row| {
                entry_from_row(kind, row)
            })
            .optional()?;
        Ok(entry)
    }
}

#[async_trait]
impl OntologyStore for SqliteStore {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Dictionary
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn find_entry_by_term_en(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term: &str,
    ) -> Result<Option<DictionaryEntry>> {
        self.find_entry_by_column(workspace_id, kind, category, "term_en", term)
    }

    async fn find_entry_by_term_ko(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term: &str,
    ) -> Result<Option<DictionaryEntry>> {
        self.find_entry_by_column(workspace_id, kind, category, "term_ko", term)
    }

    async fn find_synonym(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        surface: &str,
    ) -> Result<Option<Synonym>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SYNONYM_COLUMNS} FROM {} WHERE workspace_id = ?1 AND category = ?2 AND synonym = ?3",
            kind.synonym_table()
        );
        let synonym = conn
            .query_row(&sql, params![workspace_id, category, surface], |row| {
                synonym_from_row(kind, row)
            })
            .optional()?;
        Ok(synonym)
    }

    async fn get_entry(&self, kind: DictKind, id: EntryId) -> Result<Option<DictionaryEntry>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} WHERE id = ?1",
            kind.dict_table()
        );
        let entry = conn
            .query_row(&sql, params![id], |row| entry_from_row(kind, row))
            .optional()?;
        Ok(entry)
    }

    async fn insert_entry(&self, entry: &NewDictionaryEntry) -> Result<DictionaryEntry> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {} (workspace_id, category, term_en, term_ko, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'ACTIVE', ?6)",
            entry.kind.dict_table()
        );
        conn.execute(
            &sql,
            params![
                entry.workspace_id,
                entry.category,
                entry.term_en,
                entry.term_ko,
                entry.description,
                to_millis(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let stored = conn.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM {} WHERE id = ?1",
                entry.kind.dict_table()
            ),
            params![id],
            |row| entry_from_row(entry.kind, row),
        )?;
        Ok(stored)
    }

    async fn insert_synonym(&self, synonym: &NewSynonym) -> Result<Synonym> {
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT INTO {} (workspace_id, category, synonym, target_id, language)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            synonym.kind.synonym_table()
        );
        conn.execute(
            &sql,
            params![
                synonym.workspace_id,
                synonym.category,
                synonym.synonym,
                synonym.target_id,
                synonym.language,
            ],
        )?;
        Ok(Synonym {
            id: conn.last_insert_rowid(),
            workspace_id: synonym.workspace_id,
            kind: synonym.kind,
            category: synonym.category.clone(),
            synonym: synonym.synonym.clone(),
            target_id: synonym.target_id,
            language: synonym.language,
        })
    }

    async fn list_synonyms(&self, kind: DictKind, target_id: EntryId) -> Result<Vec<Synonym>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SYNONYM_COLUMNS} FROM {} WHERE target_id = ?1 ORDER BY id",
            kind.synonym_table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let synonyms = stmt
            .query_map(params![target_id], |row| synonym_from_row(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(synonyms)
    }

    async fn count_entries(&self, workspace_id: WorkspaceId, kind: DictKind) -> Result<usize> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE workspace_id = ?1",
            kind.dict_table()
        );
        let count: i64 = conn.query_row(&sql, params![workspace_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Facts
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn find_fact(
        &self,
        workspace_id: WorkspaceId,
        subject_id: EntryId,
        relation_id: EntryId,
        object_id: EntryId,
    ) -> Result<Option<Fact>> {
        let conn = self.conn.lock();
        let fact = conn
            .query_row(
                &format!(
                    "SELECT {FACT_COLUMNS} FROM fact
                     WHERE workspace_id = ?1 AND subject_id = ?2 AND relation_id = ?3 AND object_id = ?4"
                ),
                params![workspace_id, subject_id, relation_id, object_id],
                fact_from_row,
            )
            .optional()?;
        Ok(fact)
    }

    async fn insert_fact(&self, fact: &NewFact) -> Result<Fact> {
        let conn = self.conn.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO fact (workspace_id, subject_id, relation_id, object_id, confidence, evidence_level, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fact.workspace_id,
                fact.subject_id,
                fact.relation_id,
                fact.object_id,
                fact.confidence,
                fact.evidence_level,
                to_millis(now),
            ],
        )?;
        Ok(Fact {
            id: conn.last_insert_rowid(),
            workspace_id: fact.workspace_id,
            subject_id: fact.subject_id,
            relation_id: fact.relation_id,
            object_id: fact.object_id,
            confidence: fact.confidence,
            evidence_level: fact.evidence_level,
            created_at: from_millis(to_millis(now)),
        })
    }

    async fn count_facts(&self, workspace_id: WorkspaceId) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fact WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // References
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn insert_reference(
        &self,
        kind: ReferenceKind,
        target_id: i64,
        document_id: DocumentId,
        chunk_id: ChunkId,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT OR IGNORE INTO {} (target_id, document_id, chunk_id) VALUES (?1, ?2, ?3)",
            kind.table()
        );
        let inserted = conn.execute(&sql, params![target_id, document_id, chunk_id])?;
        Ok(inserted == 1)
    }

    async fn count_references(&self, kind: ReferenceKind, target_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let sql = format!("SELECT COUNT(*) FROM {} WHERE target_id = ?1", kind.table());
        let count: i64 = conn.query_row(&sql, params![target_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn delete_references_by_document(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for kind in ReferenceKind::ALL {
            if chunk_ids.is_empty() {
                deleted += tx.execute(
                    &format!("DELETE FROM {} WHERE document_id = ?1", kind.table()),
                    params![document_id],
                )?;
            } else {
                let sql = format!(
                    "DELETE FROM {} WHERE document_id = ?1 AND chunk_id = ?2",
                    kind.table()
                );
                for chunk_id in chunk_ids {
                    deleted += tx.execute(&sql, params![document_id, chunk_id])?;
                }
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Orphan sweep
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn delete_orphan_facts(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM fact
             WHERE NOT EXISTS (SELECT 1 FROM fact_reference r WHERE r.target_id = fact.id)",
            [],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn delete_synonyms_of_orphan_entries(&self, kind: DictKind) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let sql = format!(
            "DELETE FROM {} WHERE target_id IN ({})",
            kind.synonym_table(),
            orphan_entry_predicate(kind)
        );
        let deleted = tx.execute(&sql, [])?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn delete_orphan_entries(&self, kind: DictKind) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // Synonyms still pointing at an orphan would trip the foreign key
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE target_id IN ({})",
                kind.synonym_table(),
                orphan_entry_predicate(kind)
            ),
            [],
        )?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE id IN ({})",
                kind.dict_table(),
                orphan_entry_predicate(kind)
            ),
            [],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Snapshot
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn snapshot_workspace(&self, workspace_id: WorkspaceId) -> Result<OntologySnapshot> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut snapshot = OntologySnapshot::default();

        for kind in [DictKind::Object, DictKind::Relation] {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM {} WHERE workspace_id = ?1 ORDER BY id",
                kind.dict_table()
            ))?;
            let entries = stmt
                .query_map(params![workspace_id], |row| entry_from_row(kind, row))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            match kind {
                DictKind::Object => snapshot.objects = entries,
                DictKind::Relation => snapshot.relations = entries,
            }
        }

        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM fact WHERE workspace_id = ?1 ORDER BY id"
            ))?;
            snapshot.facts = stmt
                .query_map(params![workspace_id], fact_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }

        for (kind, owner) in [
            (ReferenceKind::Object, "object_dict"),
            (ReferenceKind::Relation, "relation_dict"),
            (ReferenceKind::Fact, "fact"),
        ] {
            let mut stmt = tx.prepare(&format!(
                "SELECT r.target_id, r.document_id, r.chunk_id FROM {} r
                 JOIN {owner} o ON o.id = r.target_id
                 WHERE o.workspace_id = ?1 ORDER BY r.id",
                kind.table()
            ))?;
            let rows = stmt
                .query_map(params![workspace_id], |row| {
                    Ok(ReferenceRow {
                        kind,
                        target_id: row.get(0)?,
                        document_id: row.get(1)?,
                        chunk_id: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            snapshot.references.extend(rows);
        }

        tx.commit()?;
        Ok(snapshot)
    }
}
