//! Ontograph configuration
//!
//! Loaded from a versioned YAML file (`version: 1`); every section falls back to
//! its defaults. `ONTOGRAPH_DATABASE` overrides the SQLite path after loading.
//!
//! ```yaml
//! version: 1
//! database: ./ontograph.db
//! chunking:
//!   chunk_size: 1200
//! graph:
//!   url: http://localhost:8529
//!   batch_size: 50
//! ```

mod error;
mod sections;

pub use error::{ConfigError, ConfigResult};
pub use sections::{
    ChunkingConfig, EmbeddingConfig, ExtractionConfig, GraphConfig, PipelineConfig,
    ResolverConfig,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding [`OntographConfig::database`]
pub const DATABASE_ENV: &str = "ONTOGRAPH_DATABASE";

const SUPPORTED_VERSIONS: [u32; 1] = [1];

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OntographConfig {
    /// Schema version (always 1)
    #[serde(default)]
    pub version: Option<u32>,

    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

fn default_database() -> String {
    "ontograph.db".to_string()
}

impl Default for OntographConfig {
    fn default() -> Self {
        Self {
            version: Some(1),
            database: default_database(),
            pipeline: PipelineConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            graph: GraphConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl OntographConfig {
    /// Load, validate and apply environment overrides
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and version-check without touching the environment
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: OntographConfig = serde_yaml::from_str(content)?;
        match config.version {
            None => return Err(ConfigError::MissingVersion),
            Some(v) if !SUPPORTED_VERSIONS.contains(&v) => {
                return Err(ConfigError::UnsupportedVersion {
                    found: v,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.trim().is_empty() {
                self.database = database;
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.pipeline.validate()?;
        self.chunking.validate()?;
        self.extraction.validate()?;
        self.embedding.validate()?;
        self.graph.validate()?;
        self.resolver.validate()?;
        Ok(())
    }
}

/// Read a secret from the env var a config section names
pub fn secret_from_env(var: &str) -> ConfigResult<String> {
    std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))
}
