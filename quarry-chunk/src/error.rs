use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or chunking documents.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// Invalid chunker configuration
    #[error("Invalid chunker configuration: {message}")]
    InvalidConfig { message: String },

    /// Document has no usable text content
    #[error("Document '{id}' has no text content")]
    EmptyDocument { id: String },

    /// Corpus file does not exist
    #[error("Corpus file not found: {}", path.display())]
    CorpusNotFound { path: PathBuf },

    /// IO error reading or writing corpus files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed corpus JSON
    #[error("Invalid corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChunkError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn empty_document(id: impl Into<String>) -> Self {
        Self::EmptyDocument { id: id.into() }
    }
}

/// Result type alias for chunking operations
pub type Result<T> = std::result::Result<T, ChunkError>;
