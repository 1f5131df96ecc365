//! `quarry.toml` loading.
//!
//! Every section and field is optional. A missing file at the default path
//! falls back to defaults; an explicitly requested file must exist and
//! parse.

use anyhow::{Context, Result};
use quarry_chunk::ChunkerConfig;
use quarry_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::query::OllamaConfig;
use crate::retrieval::RetrieverConfig;

pub const DEFAULT_CONFIG_FILE: &str = "quarry.toml";
pub const DEFAULT_BASE_DIR: &str = ".quarry";

/// Where the index database lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub base_dir: PathBuf,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
        }
    }
}

/// Top-level configuration covering every subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    pub chunker: ChunkerConfig,
    pub embedding: EmbedConfig,
    pub retriever: RetrieverConfig,
    pub ollama: OllamaConfig,
    pub index: IndexSection,
}

impl QuarryConfig {
    /// Load from an explicit path, or from `quarry.toml` in the working
    /// directory when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check every section up front so bad values fail before any work.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        self.embedding.validate()?;
        self.retriever.validate()?;
        self.ollama.validate()?;
        Ok(())
    }
}
