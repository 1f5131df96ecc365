use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Invalid embedding configuration
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Requested model name is not one of the supported models
    #[error("Unknown embedding model: {name}")]
    UnknownModel { name: String },

    /// Model failed to initialize
    #[error("Failed to initialize embedding model: {source}")]
    ModelInitialization {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Embedding generation failed
    #[error("Failed to generate embeddings: {source}")]
    EmbeddingGeneration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error during model setup
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Async task failure
    #[error("Async task error: {0}")]
    AsyncTask(#[from] tokio::task::JoinError),

    /// Other errors from dependencies
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl EmbedError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn model_init(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    pub fn embedding_gen(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }
}

/// Result type alias for embedding operations
pub type Result<T> = std::result::Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EmbedError::invalid_config("batch size must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid embedding configuration: batch size must be greater than zero"
        );

        let err = EmbedError::UnknownModel {
            name: "not-a-model".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown embedding model: not-a-model");
    }

    #[test]
    fn test_error_conversion_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EmbedError = io.into();
        assert!(matches!(err, EmbedError::Io(_)));
    }
}
