use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default embedding model, a small sentence transformer that balances
/// quality against download size.
pub const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Configuration for an embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Model identifier, e.g. "all-minilm-l6-v2"
    pub model_name: String,
    /// Number of texts embedded per inference call
    pub batch_size: usize,
    /// L2-normalize embeddings before storage
    pub normalize: bool,
    /// Directory for downloaded model files (fastembed's default when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            normalize: true,
            cache_dir: None,
        }
    }
}

impl EmbedConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model name cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch size must be greater than zero",
            ));
        }
        Ok(())
    }
}
