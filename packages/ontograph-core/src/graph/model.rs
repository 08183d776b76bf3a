//! Graph-side documents and key derivation
//!
//! Node key = sanitized English term + `_` + dictionary id, so two entries with
//! colliding display terms still get distinct keys. Edge key = fact id.

use ontograph_storage::{DictKind, EntryId, EvidenceLevel, FactId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// ArangoDB `_key` length limit
pub const MAX_KEY_BYTES: usize = 254;

/// Replace everything outside `[A-Za-z0-9_-]` with `_`, collapsing runs
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "term".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Deterministic node key, at most [`MAX_KEY_BYTES`] bytes
pub fn node_key(term_en: &str, id: EntryId) -> String {
    let suffix = format!("_{id}");
    let mut base = sanitize_key(term_en);
    // sanitize_key output is ASCII, so byte truncation is char-safe
    base.truncate(MAX_KEY_BYTES - suffix.len());
    let base = base.trim_end_matches('_');
    let base = if base.is_empty() { "term" } else { base };
    format!("{base}{suffix}")
}

pub fn edge_key(fact_id: FactId) -> String {
    fact_id.to_string()
}

/// Cosine similarity; `None` on length mismatch or a zero vector
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

/// Collection and graph names of one workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLayout {
    pub objects: String,
    pub relations: String,
    /// Edge collection, object node -> object node
    pub facts: String,
    pub graph: String,
}

impl GraphLayout {
    pub fn for_workspace(prefix: &str, workspace_id: WorkspaceId) -> Self {
        let base = format!("{prefix}_ws{workspace_id}");
        Self {
            objects: format!("{base}_objects"),
            relations: format!("{base}_relations"),
            facts: format!("{base}_facts"),
            graph: format!("{base}_ontology"),
        }
    }

    pub fn collection_for(&self, kind: DictKind) -> &str {
        match kind {
            DictKind::Object => &self.objects,
            DictKind::Relation => &self.relations,
        }
    }
}

/// Object or relation node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    #[serde(rename = "_key")]
    pub key: String,
    pub entry_id: EntryId,
    pub workspace_id: WorkspaceId,
    pub kind: DictKind,
    pub category: String,
    pub term_en: String,
    pub term_ko: String,
    pub description: Option<String>,
    pub document_ids: Vec<i64>,
    pub chunk_ids: Vec<i64>,
    /// Text the embedding was computed from
    pub summary: String,
    pub embedding: Option<Vec<f64>>,
}

/// Fact edge between two object nodes; the relation rides along as properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDocument {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
    pub fact_id: FactId,
    pub workspace_id: WorkspaceId,
    pub relation_id: EntryId,
    pub relation_key: String,
    pub relation_en: String,
    pub relation_ko: String,
    pub confidence: f64,
    pub evidence_level: EvidenceLevel,
    pub document_ids: Vec<i64>,
    pub chunk_ids: Vec<i64>,
    pub summary: String,
    pub embedding: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("Vitamin C"), "Vitamin_C");
        assert_eq!(sanitize_key("  omega-3 / fish oil "), "omega-3_fish_oil");
        assert_eq!(sanitize_key("비타민C"), "C");
        assert_eq!(sanitize_key("비타민"), "term");
    }

    #[test]
    fn test_node_key_includes_id() {
        assert_eq!(node_key("Vitamin C", 12), "Vitamin_C_12");
        assert_ne!(node_key("Vitamin C", 1), node_key("Vitamin-C!", 2));
    }

    #[test]
    fn test_node_key_is_capped() {
        let long = "a".repeat(1000);
        let key = node_key(&long, 987_654);
        assert_eq!(key.len(), MAX_KEY_BYTES);
        assert!(key.ends_with("_987654"));
    }

    #[test]
    fn test_layout_names() {
        let layout = GraphLayout::for_workspace("ontograph", 3);
        assert_eq!(layout.objects, "ontograph_ws3_objects");
        assert_eq!(layout.facts, "ontograph_ws3_facts");
        assert_eq!(layout.collection_for(DictKind::Relation), "ontograph_ws3_relations");
    }

    #[test]
    fn test_cosine() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_edge_document_field_names() {
        let edge = EdgeDocument {
            key: edge_key(7),
            from: "c/a_1".to_string(),
            to: "c/b_2".to_string(),
            fact_id: 7,
            workspace_id: 1,
            relation_id: 3,
            relation_key: "supports_3".to_string(),
            relation_en: "supports".to_string(),
            relation_ko: "돕다".to_string(),
            confidence: 0.9,
            evidence_level: EvidenceLevel::Explicit,
            document_ids: vec![5],
            chunk_ids: vec![9],
            summary: "a supports b".to_string(),
            embedding: None,
        };
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["_key"], "7");
        assert_eq!(value["_from"], "c/a_1");
        assert_eq!(value["evidence_level"], "EXPLICIT");
        assert!(value["embedding"].is_null());
    }

    proptest! {
        #[test]
        fn prop_node_key_is_safe_and_bounded(term in "\\PC{0,400}", id in 0i64..i64::MAX) {
            let key = node_key(&term, id);
            prop_assert!(key.len() <= MAX_KEY_BYTES);
            prop_assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
            let expected_suffix = format!("_{}", id);
            prop_assert!(key.ends_with(&expected_suffix));
        }
    }
}
