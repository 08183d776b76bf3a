//! Dictionary dedup, reference counting and chunk ingest against SQLite

use std::sync::Arc;

use ontograph_core::config::ResolverConfig;
use ontograph_core::extraction::ExtractionPayload;
use ontograph_core::ontology::{DictionaryResolver, OntologyIngestor, ReferenceTracker};
use ontograph_storage::{DictKind, OntologyStore, ReferenceKind, SqliteStore};
use pretty_assertions::assert_eq;

fn setup() -> (Arc<SqliteStore>, Arc<DictionaryResolver>, Arc<ReferenceTracker>) {
    let store = Arc::new(SqliteStore::in_memory().expect("in-memory store"));
    let dyn_store: Arc<dyn OntologyStore> = store.clone();
    let resolver = Arc::new(DictionaryResolver::new(
        dyn_store.clone(),
        &ResolverConfig::default(),
    ));
    let tracker = Arc::new(ReferenceTracker::new(dyn_store));
    (store, resolver, tracker)
}

#[tokio::test]
async fn test_repeated_find_or_create_yields_one_entry_and_one_reference() {
    let (store, resolver, tracker) = setup();

    let first = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "VitaminC", "비타민C")
        .await
        .expect("first resolve");
    assert_eq!(first, 1);
    let second = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "VitaminC", "비타민C")
        .await
        .expect("second resolve");
    assert_eq!(second, first);
    assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 1);

    assert!(tracker
        .record_reference(ReferenceKind::Object, first, 5, 9)
        .await
        .unwrap());
    assert!(!tracker
        .record_reference(ReferenceKind::Object, first, 5, 9)
        .await
        .unwrap());
    assert_eq!(
        tracker.reference_count(ReferenceKind::Object, first).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_whitespace_variants_resolve_to_one_entry() {
    let (store, resolver, _) = setup();

    let stored = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Vitamin  C", "비타민  C")
        .await
        .unwrap();

    let synonyms = store.list_synonyms(DictKind::Object, stored).await.unwrap();
    let surfaces: Vec<&str> = synonyms.iter().map(|s| s.synonym.as_str()).collect();
    assert!(surfaces.contains(&"VitaminC"));

    let single_space = resolver
        .lookup(1, DictKind::Object, "ingredient", "Vitamin C", "비타민 C")
        .await
        .unwrap();
    let no_space = resolver
        .lookup(1, DictKind::Object, "ingredient", "VitaminC", "비타민C")
        .await
        .unwrap();
    assert_eq!(single_space, Some(stored));
    assert_eq!(no_space, Some(stored));

    let resolved = resolver
        .find_or_create(1, DictKind::Object, " ingre dient ", "Vitamin C", "")
        .await
        .unwrap();
    assert_eq!(resolved, stored);
    assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 1);
}

#[tokio::test]
async fn test_entry_survives_until_last_reference_is_removed() {
    let (store, resolver, tracker) = setup();
    let id = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Zinc", "아연")
        .await
        .unwrap();

    let documents: Vec<i64> = (10..14).collect();
    for (i, doc) in documents.iter().enumerate() {
        tracker
            .record_reference(ReferenceKind::Object, id, *doc, 100 + i as i64)
            .await
            .unwrap();
    }

    let (last, rest) = documents.split_last().unwrap();
    for doc in rest {
        let report = tracker.remove_document(*doc).await.unwrap();
        assert_eq!(report.references_deleted, 1);
        assert!(store.get_entry(DictKind::Object, id).await.unwrap().is_some());
    }

    let report = tracker.remove_document(*last).await.unwrap();
    assert_eq!(report.sweep.map(|s| s.objects), Some(1));
    assert!(store.get_entry(DictKind::Object, id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_removing_some_chunks_keeps_entries_of_other_chunks() {
    let (store, resolver, tracker) = setup();
    let kept = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Iron", "철")
        .await
        .unwrap();
    let dropped = resolver
        .find_or_create(1, DictKind::Object, "ingredient", "Lead", "납")
        .await
        .unwrap();
    tracker.record_reference(ReferenceKind::Object, kept, 1, 1).await.unwrap();
    tracker.record_reference(ReferenceKind::Object, dropped, 1, 2).await.unwrap();

    let report = tracker.remove_document_source(1, &[2]).await.unwrap();
    assert_eq!(report.references_deleted, 1);
    assert!(store.get_entry(DictKind::Object, kept).await.unwrap().is_some());
    assert!(store.get_entry(DictKind::Object, dropped).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_find_or_create_inserts_one_row() {
    let (store, resolver, _) = setup();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            // Mix spacing variants of the same term
            let term = if i % 2 == 0 { "Omega 3" } else { "Omega3" };
            tokio::spawn(async move {
                resolver
                    .find_or_create(1, DictKind::Object, "ingredient", term, "오메가3")
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("task").expect("resolve"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 1);
}

#[tokio::test]
async fn test_ingest_chunk_resolves_entities_and_facts() {
    let (store, resolver, tracker) = setup();
    let ingestor = OntologyIngestor::new(resolver, tracker.clone());

    let payload = ExtractionPayload::parse(
        r#"```json
        {
          "entities": [
            {"category": "ingredient", "term_en": "Vitamin C", "term_ko": "비타민C"},
            {"category": "effect", "term_en": "Immunity", "term_ko": "면역"}
          ],
          "triples": [{
            "subject": {"category": "ingredient", "term_en": "Vitamin  C", "term_ko": "비타민C"},
            "relation": {"category": "effect", "term_en": "supports", "term_ko": "돕다"},
            "object": {"category": "effect", "term_en": "Immunity", "term_ko": "면역"},
            "confidence": 0.8,
            "evidence_level": "EXPLICIT"
          }]
        }
        ```"#,
    )
    .expect("payload parses");

    let report = ingestor.ingest_chunk(1, 7, 70, &payload).await.unwrap();
    assert_eq!(report.entities, 2);
    assert_eq!(report.facts, 1);
    assert_eq!(report.entries_created, 3);
    // 2 objects + 1 relation + 1 fact
    assert_eq!(report.references_added, 4);
    assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 2);
    assert_eq!(store.count_facts(1).await.unwrap(), 1);

    let again = ingestor.ingest_chunk(1, 7, 70, &payload).await.unwrap();
    assert_eq!(again.entries_created, 0);
    assert_eq!(again.references_added, 0);
    assert_eq!(store.count_facts(1).await.unwrap(), 1);

    let removal = tracker.remove_document(7).await.unwrap();
    let sweep = removal.sweep.expect("sweep ran");
    assert_eq!(sweep.facts, 1);
    assert_eq!(sweep.objects, 2);
    assert_eq!(sweep.relations, 1);
    assert_eq!(store.count_facts(1).await.unwrap(), 0);
}

#[tokio::test]
async fn test_blank_triple_subject_resolves_to_placeholder() {
    let (store, resolver, tracker) = setup();
    let ingestor = OntologyIngestor::new(resolver.clone(), tracker);

    let payload = ExtractionPayload::parse(
        r#"{
          "entities": [{"category": "ingredient", "term_en": "Zinc", "term_ko": "아연"}],
          "triples": [{
            "subject": {"category": "ingredient", "term_en": " ", "term_ko": ""},
            "relation": {"category": "effect", "term_en": "supports", "term_ko": "돕다"},
            "object": {"category": "function", "term_en": "Immunity", "term_ko": "면역"}
          }]
        }"#,
    )
    .expect("blank subject does not reject the payload");

    let report = ingestor.ingest_chunk(1, 8, 80, &payload).await.unwrap();
    assert_eq!(report.entities, 1);
    assert_eq!(report.facts, 1);
    // Zinc, placeholder subject, Immunity
    assert_eq!(store.count_entries(1, DictKind::Object).await.unwrap(), 3);
    assert_eq!(store.count_facts(1).await.unwrap(), 1);

    let placeholder = ResolverConfig::default().placeholder_term;
    assert!(resolver
        .lookup(1, DictKind::Object, "ingredient", &placeholder, &placeholder)
        .await
        .unwrap()
        .is_some());
    assert!(resolver
        .lookup(1, DictKind::Object, "ingredient", "Zinc", "아연")
        .await
        .unwrap()
        .is_some());
}
