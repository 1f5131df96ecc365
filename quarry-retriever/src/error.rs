use thiserror::Error;

/// Errors from index access and context retrieval.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Invalid retriever configuration
    #[error("Invalid retriever configuration: {message}")]
    InvalidConfig { message: String },

    /// Index is missing, incomplete, or has no embedded chunks
    #[error("Index unavailable: {message}")]
    IndexUnavailable { message: String },

    /// Search did not finish within the configured timeout
    #[error("Retrieval timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Storage-level failure
    #[error(transparent)]
    Index(#[from] anyhow::Error),

    /// Embedding failure while encoding the query
    #[error(transparent)]
    Embedding(#[from] quarry_embed::EmbedError),
}

impl RetrievalError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            message: message.into(),
        }
    }
}

/// Result type alias for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors from talking to the Ollama generation server.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Invalid generation configuration
    #[error("Invalid Ollama configuration: {message}")]
    InvalidConfig { message: String },

    /// Server unreachable
    #[error("Cannot connect to Ollama at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded the configured timeout
    #[error("Request to Ollama timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Server answered with a non-success status
    #[error("Ollama API error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// Response body did not parse
    #[error("Invalid response from Ollama: {message}")]
    InvalidResponse { message: String },

    /// Configured model is not installed on the server
    #[error("Model '{model}' is not available on the Ollama server")]
    ModelNotAvailable { model: String },
}

impl GenerationError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}
