//! quarry-retriever: Retrieval-augmented question answering over a local corpus
//!
//! This crate builds a searchable index from a JSON document corpus and answers
//! questions against it: documents are chunked, embedded with a local ONNX
//! model, stored in SQLite, retrieved by cosine similarity, and handed to an
//! Ollama server for answer generation.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Index building and budgeted context assembly
//! - **[`storage`]**: SQLite chunk store with embedding-aware search
//! - **[`query`]**: Ollama client and the question answering engine
//! - **[`config`]**: `quarry.toml` loading with per-section defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_retriever::retrieval::{IndexBuilder, IndexBuilderConfig};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Build an index from a corpus of documents
//! let config = IndexBuilderConfig::new(".quarry");
//! let builder = IndexBuilder::new(config).await?;
//! let stats = builder.build_from_path(Path::new("corpus.json")).await?;
//! println!("Indexed {} documents", stats.documents_loaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Corpus JSON → Chunker → Embeddings → SQLite index
//!                                          ↓
//!   Answer ← Ollama ← Prompt ← ContextRetriever ← cosine search
//! ```

pub mod config;
pub mod error;
pub mod query;
pub mod retrieval;
pub mod storage;
