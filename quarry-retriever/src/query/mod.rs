//! Answer generation on top of retrieval.
//!
//! [`ollama`] is a thin client for a local Ollama server. [`engine`] wires
//! retrieval and generation together into single-query, batch, and
//! interactive chat entry points.

pub mod engine;
pub mod ollama;

pub use engine::{GenerationBackend, GenerationStats, QueryEngine, QueryResponse};
pub use ollama::{GenerateResponse, ModelInfo, OllamaClient, OllamaConfig};
