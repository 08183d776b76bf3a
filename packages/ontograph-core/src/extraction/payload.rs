//! Structured LLM extraction output
//!
//! Validated as soon as the completion arrives; a payload that does not parse
//! becomes a per-chunk `MalformedPayload` failure, never a stage failure.

use ontograph_storage::EvidenceLevel;
use serde::{Deserialize, Serialize};

use crate::errors::{OntologyError, Result};

/// One bilingual term as emitted by the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTerm {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub term_en: String,
    #[serde(default)]
    pub term_ko: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExtractedTerm {
    pub fn new(category: &str, term_en: &str, term_ko: &str) -> Self {
        Self {
            category: category.to_string(),
            term_en: term_en.to_string(),
            term_ko: term_ko.to_string(),
            description: None,
        }
    }

    /// Both language terms blank
    pub fn is_blank(&self) -> bool {
        self.term_en.trim().is_empty() && self.term_ko.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTriple {
    pub subject: ExtractedTerm,
    pub relation: ExtractedTerm,
    pub object: ExtractedTerm,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl ExtractedTriple {
    /// Unknown or missing labels fall back to `IMPLIED`
    pub fn evidence(&self) -> EvidenceLevel {
        self.evidence_level
            .as_deref()
            .and_then(|raw| EvidenceLevel::parse(raw).ok())
            .unwrap_or_default()
    }
}

/// Validated extraction result for one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<ExtractedTerm>,
    #[serde(default)]
    pub triples: Vec<ExtractedTriple>,
}

impl ExtractionPayload {
    /// Parse completion text, tolerating a surrounding markdown code fence
    pub fn parse(raw: &str) -> Result<Self> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(OntologyError::malformed("empty completion"));
        }
        let payload: ExtractionPayload = serde_json::from_str(body)
            .map_err(|e| OntologyError::malformed(format!("invalid JSON: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<()> {
        // Blank terms are left to the resolver's placeholder policy
        for (i, triple) in self.triples.iter().enumerate() {
            if !triple.confidence.is_finite() || !(0.0..=1.0).contains(&triple.confidence) {
                return Err(OntologyError::malformed(format!(
                    "triple {i}: confidence {} outside 0..=1",
                    triple.confidence
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.triples.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| OntologyError::malformed(format!("cannot serialize payload: {e}")))
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json)
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
