//! Dictionary Resolver
//!
//! Canonicalizes extracted object/relation terms against the dictionary and
//! synonym tables, creating a canonical entry when nothing matches.
//!
//! # Lookup order
//!
//! Each step is tried for both languages before moving on:
//! 1. canonical term
//! 2. synonym surface form
//! 3. whitespace-stripped term as canonical
//! 4. whitespace-stripped term as synonym
//!
//! # Concurrency
//!
//! find-or-create runs under a striped async lock keyed by
//! (workspace, kind, category). Two callers resolving terms of the same
//! category are serialized; unrelated categories proceed in parallel.
//! `lock_stripes = 1` gives a single coarse section. A uniqueness conflict
//! on insert (e.g. another process) is resolved by re-lookup.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ontograph_storage::{
    DictKind, DictionaryEntry, EntryId, EvidenceLevel, FactId, Language, NewDictionaryEntry,
    NewFact, NewSynonym, OntologyStore, WorkspaceId,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::normalize::NormalizedTerms;
use crate::config::ResolverConfig;
use crate::errors::{OntologyError, Result};
use crate::extraction::ExtractedTerm;

/// Outcome of one find-or-create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: EntryId,
    /// A new canonical row was inserted
    pub created: bool,
}

pub struct DictionaryResolver {
    store: Arc<dyn OntologyStore>,
    stripes: Vec<Mutex<()>>,
    placeholder: String,
}

impl DictionaryResolver {
    pub fn new(store: Arc<dyn OntologyStore>, config: &ResolverConfig) -> Self {
        let stripes = (0..config.lock_stripes.max(1))
            .map(|_| Mutex::new(()))
            .collect();
        Self {
            store,
            stripes,
            placeholder: config.placeholder_term.clone(),
        }
    }

    pub fn lock_stripes(&self) -> usize {
        self.stripes.len()
    }

    /// Resolve `(category, term_en, term_ko)` to a canonical entry id
    pub async fn find_or_create(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term_en: &str,
        term_ko: &str,
    ) -> Result<EntryId> {
        let terms = NormalizedTerms::new(category, term_en, term_ko, &self.placeholder);
        Ok(self.resolve_terms(workspace_id, kind, &terms, None).await?.id)
    }

    /// Resolve an extracted term, keeping its description on first insert
    pub async fn resolve(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        term: &ExtractedTerm,
    ) -> Result<Resolution> {
        let terms = NormalizedTerms::new(
            &term.category,
            &term.term_en,
            &term.term_ko,
            &self.placeholder,
        );
        let description = term
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        self.resolve_terms(workspace_id, kind, &terms, description)
            .await
    }

    /// Lookup only; never inserts
    pub async fn lookup(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        category: &str,
        term_en: &str,
        term_ko: &str,
    ) -> Result<Option<EntryId>> {
        let terms = NormalizedTerms::new(category, term_en, term_ko, &self.placeholder);
        self.lookup_terms(workspace_id, kind, &terms).await
    }

    /// Resolve a `(subject, relation, object)` triple to a fact id
    ///
    /// Facts rely on the store's uniqueness constraint alone: insert, and on
    /// conflict read the winner back.
    pub async fn find_or_create_fact(
        &self,
        workspace_id: WorkspaceId,
        subject_id: EntryId,
        relation_id: EntryId,
        object_id: EntryId,
        confidence: f64,
        evidence_level: EvidenceLevel,
    ) -> Result<FactId> {
        if let Some(fact) = self
            .store
            .find_fact(workspace_id, subject_id, relation_id, object_id)
            .await?
        {
            return Ok(fact.id);
        }

        let new_fact = NewFact {
            workspace_id,
            subject_id,
            relation_id,
            object_id,
            confidence,
            evidence_level,
        };
        match self.store.insert_fact(&new_fact).await {
            Ok(fact) => {
                debug!(workspace_id, fact_id = fact.id, subject_id, relation_id, object_id, "Created fact");
                Ok(fact.id)
            }
            Err(e) if e.is_conflict() => self
                .store
                .find_fact(workspace_id, subject_id, relation_id, object_id)
                .await?
                .map(|fact| fact.id)
                .ok_or_else(|| OntologyError::DedupConflict {
                    kind: DictKind::Relation,
                    category: "fact".to_string(),
                    term: format!("{subject_id}-{relation_id}-{object_id}"),
                }),
            Err(e) => Err(e.into()),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Internals
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn stripe_for(&self, workspace_id: WorkspaceId, kind: DictKind, category: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        workspace_id.hash(&mut hasher);
        kind.hash(&mut hasher);
        category.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }

    async fn resolve_terms(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        terms: &NormalizedTerms,
        description: Option<&str>,
    ) -> Result<Resolution> {
        let _guard = self
            .stripe_for(workspace_id, kind, &terms.category)
            .lock()
            .await;

        if let Some(id) = self.lookup_terms(workspace_id, kind, terms).await? {
            return Ok(Resolution { id, created: false });
        }
        self.create(workspace_id, kind, terms, description).await
    }

    async fn lookup_terms(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        terms: &NormalizedTerms,
    ) -> Result<Option<EntryId>> {
        let store = &self.store;
        let category = terms.category.as_str();
        let (en, ko) = (terms.term_en.as_str(), terms.term_ko.as_str());

        // 1. canonical
        if let Some(entry) = store.find_entry_by_term_en(workspace_id, kind, category, en).await? {
            return Ok(Some(entry.id));
        }
        if let Some(entry) = store.find_entry_by_term_ko(workspace_id, kind, category, ko).await? {
            return Ok(Some(entry.id));
        }

        // 2. synonym
        for surface in distinct(&[en, ko]) {
            if let Some(syn) = store.find_synonym(workspace_id, kind, category, surface).await? {
                return Ok(Some(syn.target_id));
            }
        }

        let stripped_en = terms.stripped_en();
        let stripped_ko = terms.stripped_ko();

        // 3. stripped canonical
        if stripped_en != en {
            if let Some(entry) = store
                .find_entry_by_term_en(workspace_id, kind, category, &stripped_en)
                .await?
            {
                return Ok(Some(entry.id));
            }
        }
        if stripped_ko != ko {
            if let Some(entry) = store
                .find_entry_by_term_ko(workspace_id, kind, category, &stripped_ko)
                .await?
            {
                return Ok(Some(entry.id));
            }
        }

        // 4. stripped synonym
        for surface in distinct(&[stripped_en.as_str(), stripped_ko.as_str()]) {
            if surface == en || surface == ko {
                continue;
            }
            if let Some(syn) = store.find_synonym(workspace_id, kind, category, surface).await? {
                return Ok(Some(syn.target_id));
            }
        }

        Ok(None)
    }

    async fn create(
        &self,
        workspace_id: WorkspaceId,
        kind: DictKind,
        terms: &NormalizedTerms,
        description: Option<&str>,
    ) -> Result<Resolution> {
        let new_entry = NewDictionaryEntry {
            workspace_id,
            kind,
            category: terms.category.clone(),
            term_en: terms.term_en.clone(),
            term_ko: terms.term_ko.clone(),
            description: description.map(str::to_string),
        };

        let entry = match self.store.insert_entry(&new_entry).await {
            Ok(entry) => entry,
            Err(e) if e.is_conflict() => {
                debug!(workspace_id, %kind, term_en = %terms.term_en, "Insert conflict, re-resolving");
                return match self.lookup_terms(workspace_id, kind, terms).await? {
                    Some(id) => Ok(Resolution { id, created: false }),
                    None => Err(OntologyError::DedupConflict {
                        kind,
                        category: terms.category.clone(),
                        term: terms.term_en.clone(),
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            workspace_id,
            %kind,
            entry_id = entry.id,
            category = %entry.category,
            term_en = %entry.term_en,
            "Created dictionary entry"
        );
        self.register_stripped_synonyms(&entry, terms).await?;
        Ok(Resolution {
            id: entry.id,
            created: true,
        })
    }

    /// Stripped forms differing from the raw term become synonyms of the new entry
    async fn register_stripped_synonyms(
        &self,
        entry: &DictionaryEntry,
        terms: &NormalizedTerms,
    ) -> Result<()> {
        let mut candidates: Vec<(String, Language)> = Vec::with_capacity(2);
        for (raw, stripped, language) in [
            (&terms.term_en, terms.stripped_en(), Language::En),
            (&terms.term_ko, terms.stripped_ko(), Language::Ko),
        ] {
            let is_canonical = stripped == entry.term_en || stripped == entry.term_ko;
            let already_listed = candidates.iter().any(|(s, _)| *s == stripped);
            if stripped != *raw && !stripped.is_empty() && !is_canonical && !already_listed {
                candidates.push((stripped, language));
            }
        }

        for (surface, language) in candidates {
            let synonym = NewSynonym {
                workspace_id: entry.workspace_id,
                kind: entry.kind,
                category: entry.category.clone(),
                synonym: surface,
                target_id: entry.id,
                language,
            };
            match self.store.insert_synonym(&synonym).await {
                Ok(_) => {}
                // Surface already maps somewhere; lookups keep working
                Err(e) if e.is_conflict() => {
                    debug!(entry_id = entry.id, synonym = %synonym.synonym, "Synonym already registered");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn distinct<'a>(items: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_storage::SqliteStore;

    fn resolver(stripes: usize) -> (DictionaryResolver, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let config = ResolverConfig {
            lock_stripes: stripes,
            ..Default::default()
        };
        (DictionaryResolver::new(store.clone(), &config), store)
    }

    #[tokio::test]
    async fn test_same_terms_same_id() {
        let (resolver, store) = resolver(8);
        let first = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "VitaminC", "비타민C")
            .await
            .unwrap();
        let second = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "VitaminC", "비타민C")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_match_on_either_language() {
        let (resolver, _) = resolver(8);
        let id = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Vitamin C", "비타민C")
            .await
            .unwrap();
        let by_ko = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Ascorbic acid", "비타민C")
            .await
            .unwrap();
        assert_eq!(id, by_ko);
    }

    #[tokio::test]
    async fn test_stripped_synonym_registered() {
        let (resolver, store) = resolver(8);
        let id = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Vitamin  C", "비타민 씨")
            .await
            .unwrap();

        let synonyms = store.list_synonyms(DictKind::Object, id).await.unwrap();
        let surfaces: Vec<_> = synonyms.iter().map(|s| s.synonym.as_str()).collect();
        assert_eq!(surfaces, vec!["VitaminC", "비타민씨"]);
        assert_eq!(synonyms[1].language, Language::Ko);
    }

    #[tokio::test]
    async fn test_no_synonym_when_already_stripped() {
        let (resolver, store) = resolver(8);
        let id = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Zinc", "아연")
            .await
            .unwrap();
        assert!(store.list_synonyms(DictKind::Object, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirrored_blank_term_registers_one_synonym() {
        let (resolver, store) = resolver(8);
        let id = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Vitamin  C", "")
            .await
            .unwrap();
        let entry = store.get_entry(DictKind::Object, id).await.unwrap().unwrap();
        assert_eq!(entry.term_ko, "Vitamin  C");
        assert_eq!(store.list_synonyms(DictKind::Object, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_category_stored_stripped() {
        let (resolver, store) = resolver(8);
        let id = resolver
            .find_or_create(1, DictKind::Object, "health food", "Kimchi", "김치")
            .await
            .unwrap();
        let entry = store.get_entry(DictKind::Object, id).await.unwrap().unwrap();
        assert_eq!(entry.category, "healthfood");

        let again = resolver
            .find_or_create(1, DictKind::Object, "healthfood", "Kimchi", "김치")
            .await
            .unwrap();
        assert_eq!(id, again);
    }

    #[tokio::test]
    async fn test_kinds_and_workspaces_are_isolated() {
        let (resolver, _) = resolver(1);
        let object = resolver
            .find_or_create(1, DictKind::Object, "effect", "supports", "돕다")
            .await
            .unwrap();
        let relation = resolver
            .find_or_create(1, DictKind::Relation, "effect", "supports", "돕다")
            .await
            .unwrap();
        let other_ws = resolver
            .find_or_create(2, DictKind::Object, "effect", "supports", "돕다")
            .await
            .unwrap();
        assert_eq!(resolver.lock_stripes(), 1);
        // Distinct tables: ids may coincide numerically but rows differ
        assert_eq!(object, 1);
        assert_eq!(relation, 1);
        assert_eq!(other_ws, 2);
    }

    #[tokio::test]
    async fn test_lookup_does_not_insert() {
        let (resolver, store) = resolver(8);
        assert!(resolver
            .lookup(1, DictKind::Object, "ingredient", "Zinc", "아연")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_description_kept_on_first_insert() {
        let (resolver, store) = resolver(8);
        let mut term = ExtractedTerm::new("ingredient", "Zinc", "아연");
        term.description = Some("  Essential trace mineral ".to_string());
        let first = resolver.resolve(1, DictKind::Object, &term).await.unwrap();
        assert!(first.created);

        term.description = Some("ignored".to_string());
        let second = resolver.resolve(1, DictKind::Object, &term).await.unwrap();
        assert!(!second.created);

        let entry = store.get_entry(DictKind::Object, first.id).await.unwrap().unwrap();
        assert_eq!(entry.description.as_deref(), Some("Essential trace mineral"));
    }

    #[tokio::test]
    async fn test_fact_find_or_create() {
        let (resolver, store) = resolver(8);
        let s = resolver
            .find_or_create(1, DictKind::Object, "ingredient", "Vitamin C", "비타민C")
            .await
            .unwrap();
        let o = resolver
            .find_or_create(1, DictKind::Object, "effect", "Immunity", "면역")
            .await
            .unwrap();
        let r = resolver
            .find_or_create(1, DictKind::Relation, "effect", "supports", "돕다")
            .await
            .unwrap();

        let first = resolver
            .find_or_create_fact(1, s, r, o, 0.9, EvidenceLevel::Explicit)
            .await
            .unwrap();
        let second = resolver
            .find_or_create_fact(1, s, r, o, 0.5, EvidenceLevel::Inferred)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_facts(1).await.unwrap(), 1);
    }
}
