//! Term normalization for dictionary lookups

/// Remove every whitespace char (not just the ends)
pub fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Terms after the blank policy, ready for lookup and insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTerms {
    /// Always whitespace-stripped
    pub category: String,
    /// Display form (trimmed)
    pub term_en: String,
    pub term_ko: String,
}

impl NormalizedTerms {
    /// Apply the blank policy: both blank -> placeholder, one blank -> mirror
    pub fn new(category: &str, term_en: &str, term_ko: &str, placeholder: &str) -> Self {
        let en = term_en.trim();
        let ko = term_ko.trim();
        let (en, ko) = match (en.is_empty(), ko.is_empty()) {
            (true, true) => (placeholder, placeholder),
            (true, false) => (ko, ko),
            (false, true) => (en, en),
            (false, false) => (en, ko),
        };
        Self {
            category: strip_whitespace(category),
            term_en: en.to_string(),
            term_ko: ko.to_string(),
        }
    }

    pub fn stripped_en(&self) -> String {
        strip_whitespace(&self.term_en)
    }

    pub fn stripped_ko(&self) -> String {
        strip_whitespace(&self.term_ko)
    }
}
