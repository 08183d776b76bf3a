//! Per-concern configuration sections
//!
//! Every section deserializes with `#[serde(default)]`, so a YAML file only
//! needs to mention the fields it overrides.

use super::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrator limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound for one stage unit (1..=86_400_000 ms)
    pub stage_timeout_ms: u64,

    /// Stage units of one group allowed to run at once
    pub max_parallel_stages: usize,

    /// Persisted error text is cut to this many chars
    pub error_message_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 30 * 60 * 1000,
            max_parallel_stages: num_cpus::get().max(2),
            error_message_limit: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.stage_timeout_ms == 0 || self.stage_timeout_ms > 86_400_000 {
            return Err(ConfigError::range_with_hint(
                "pipeline.stage_timeout_ms",
                self.stage_timeout_ms,
                1,
                86_400_000,
                "Stage timeout must be positive and at most one day",
            ));
        }
        if self.max_parallel_stages == 0 || self.max_parallel_stages > 256 {
            return Err(ConfigError::range_with_hint(
                "pipeline.max_parallel_stages",
                self.max_parallel_stages,
                1,
                256,
                "At least one stage must be able to run",
            ));
        }
        if self.error_message_limit < 16 || self.error_message_limit > 65_536 {
            return Err(ConfigError::range_with_hint(
                "pipeline.error_message_limit",
                self.error_message_limit,
                16,
                65_536,
                "Error text must stay readable but bounded",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Chunking
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk length in chars (100..=100_000)
    pub chunk_size: usize,

    /// Chars shared between neighbouring chunks (< chunk_size)
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 150,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size < 100 || self.chunk_size > 100_000 {
            return Err(ConfigError::range_with_hint(
                "chunking.chunk_size",
                self.chunk_size,
                100,
                100_000,
                "Chunks must hold at least a sentence and fit one prompt",
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Conflict {
                issue: format!(
                    "chunk_overlap ({}) >= chunk_size ({})",
                    self.chunk_overlap, self.chunk_size
                ),
                fix: "Lower chunking.chunk_overlap below chunking.chunk_size".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Extraction backend
// ============================================================================

/// OpenAI-compatible chat-completion backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub base_url: String,
    pub model: String,

    /// Name of the env var holding the API key (never the key itself)
    pub api_key_env: String,

    /// Prompt template used by the LLM_PROCESS stage
    pub prompt_ref: String,

    pub timeout_secs: u64,

    /// Local retries after the first attempt (0..=10)
    pub max_retries: u32,

    /// Linear backoff step: attempt n waits n * backoff_ms
    pub backoff_ms: u64,

    /// Chunks in flight per document (1..=64)
    pub max_concurrent_chunks: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            prompt_ref: "ontology_extraction".to_string(),
            timeout_secs: 120,
            max_retries: 3,
            backoff_ms: 500,
            max_concurrent_chunks: 4,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_backend(
            "extraction",
            self.timeout_secs,
            self.max_retries,
            self.backoff_ms,
        )?;
        if self.max_concurrent_chunks == 0 || self.max_concurrent_chunks > 64 {
            return Err(ConfigError::range_with_hint(
                "extraction.max_concurrent_chunks",
                self.max_concurrent_chunks,
                1,
                64,
                "Keep concurrent LLM calls within provider rate limits",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Embedding backend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible endpoint; `None` selects the local hashing embedder
    pub base_url: Option<String>,
    pub model: String,
    pub api_key_env: String,

    /// Vector width (8..=8192)
    pub dimensions: usize,

    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,

    /// Texts per embedding request (1..=2048)
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: 256,
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
            batch_size: 32,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        validate_backend(
            "embedding",
            self.timeout_secs,
            self.max_retries,
            self.backoff_ms,
        )?;
        if self.dimensions < 8 || self.dimensions > 8192 {
            return Err(ConfigError::range_with_hint(
                "embedding.dimensions",
                self.dimensions,
                8,
                8192,
                "Vector width must match the embedding model",
            ));
        }
        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::range_with_hint(
                "embedding.batch_size",
                self.batch_size,
                1,
                2048,
                "Embedding requests must carry at least one text",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Graph store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// ArangoDB endpoint; `None` keeps the graph in memory
    pub url: Option<String>,
    pub database: String,
    pub username: String,
    pub password_env: String,

    /// Collection names are `{prefix}_ws{workspace}_{objects|relations|facts}`
    pub collection_prefix: String,

    /// Rows per upsert batch (1..=1000)
    pub batch_size: usize,

    /// Batches in flight (1..=64)
    pub workers: usize,

    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: "_system".to_string(),
            username: "root".to_string(),
            password_env: "ARANGO_PASSWORD".to_string(),
            collection_prefix: "ontograph".to_string(),
            batch_size: 50,
            workers: num_cpus::get().clamp(1, 8),
            timeout_secs: 60,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::range_with_hint(
                "graph.batch_size",
                self.batch_size,
                1,
                1000,
                "Batches must hold at least one row",
            ));
        }
        if self.workers == 0 || self.workers > 64 {
            return Err(ConfigError::range_with_hint(
                "graph.workers",
                self.workers,
                1,
                64,
                "At least one batch worker is required",
            ));
        }
        let prefix_ok = !self.collection_prefix.is_empty()
            && self
                .collection_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !prefix_ok {
            return Err(ConfigError::Conflict {
                issue: format!("collection_prefix '{}' is not a valid collection name", self.collection_prefix),
                fix: "Use ASCII letters, digits, '_' or '-'".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Dictionary resolver
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Lock stripes over (workspace, kind, category); 1 = single coarse lock
    pub lock_stripes: usize,

    /// Stored when both language terms are blank
    pub placeholder_term: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 64,
            placeholder_term: "UNKNOWN".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.lock_stripes == 0 || self.lock_stripes > 4096 {
            return Err(ConfigError::range_with_hint(
                "resolver.lock_stripes",
                self.lock_stripes,
                1,
                4096,
                "Use 1 for a single coarse lock",
            ));
        }
        if self.placeholder_term.trim().is_empty() {
            return Err(ConfigError::Conflict {
                issue: "resolver.placeholder_term is blank".to_string(),
                fix: "Set a non-blank placeholder such as 'UNKNOWN'".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_backend(
    section: &str,
    timeout_secs: u64,
    max_retries: u32,
    backoff_ms: u64,
) -> ConfigResult<()> {
    if timeout_secs == 0 || timeout_secs > 3600 {
        return Err(ConfigError::range_with_hint(
            format!("{section}.timeout_secs"),
            timeout_secs,
            1,
            3600,
            "Backend calls need a bounded wait",
        ));
    }
    if max_retries > 10 {
        return Err(ConfigError::range_with_hint(
            format!("{section}.max_retries"),
            max_retries,
            0,
            10,
            "The retry budget is meant to be small",
        ));
    }
    if backoff_ms > 60_000 {
        return Err(ConfigError::range_with_hint(
            format!("{section}.backoff_ms"),
            backoff_ms,
            0,
            60_000,
            "Backoff step is per attempt and grows linearly",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
        ChunkingConfig::default().validate().unwrap();
        ExtractionConfig::default().validate().unwrap();
        EmbeddingConfig::default().validate().unwrap();
        GraphConfig::default().validate().unwrap();
        ResolverConfig::default().validate().unwrap();
    }

    #[test]
    fn test_overlap_must_be_below_size() {
        let config = ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 200,
        };
        assert!(matches!(config.validate(), Err(ConfigError::Conflict { .. })));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = GraphConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("graph.batch_size"));
    }

    #[test]
    fn test_retry_budget_bounded() {
        let config = ExtractionConfig {
            max_retries: 50,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("extraction.max_retries"));
    }

    #[test]
    fn test_collection_prefix_charset() {
        let config = GraphConfig {
            collection_prefix: "bad prefix".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
