//! Storage layer for the quarry index.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ VectorIndex                                   │
//! │   cosine search + model / completeness state  │
//! │  ┌─────────────────────────────────────────┐  │
//! │  │ ChunkIndex                              │  │
//! │  │   documents + chunks in SQLite          │  │
//! │  └─────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! [`ChunkIndex`] owns the SQLite schema and raw row access. [`VectorIndex`]
//! wraps it with embedding-aware search and the metadata that records which
//! model built the index and whether the build completed.

pub mod chunk_index;
pub mod vector_index;

pub use chunk_index::{ChunkIndex, ChunkSizeSummary, DATABASE_FILE};
pub use vector_index::{EmbeddingModelInfo, IndexHealth, IndexMetadata, IndexStats, VectorIndex};

use async_trait::async_trait;
use half::f16;
use quarry_chunk::DocumentChunk;

/// BLAKE3 hash of a document's text.
pub type ContentHash = [u8; 32];

/// A corpus document as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub source: String,
    pub category: String,
    pub content_hash: ContentHash,
    /// Length of the document text in characters
    pub original_length: usize,
}

/// A chunk row, optionally carrying its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Database rowid, set once stored
    pub id: Option<i64>,
    pub chunk_id: String,
    pub parent_doc_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub content: String,
    pub chunk_size: usize,
    pub source: String,
    pub category: String,
    pub original_length: usize,
    /// Half-precision embedding vector, absent until embedded
    pub embedding: Option<Vec<f16>>,
}

impl ChunkRecord {
    pub fn from_document_chunk(chunk: &DocumentChunk, embedding: Option<Vec<f16>>) -> Self {
        Self {
            id: None,
            chunk_id: chunk.chunk_id.clone(),
            parent_doc_id: chunk.metadata.parent_doc_id.clone(),
            chunk_index: chunk.metadata.chunk_index,
            total_chunks: chunk.metadata.total_chunks,
            content: chunk.content.clone(),
            chunk_size: chunk.metadata.chunk_size,
            source: chunk.metadata.source.clone(),
            category: chunk.metadata.category.clone(),
            original_length: chunk.metadata.original_length,
            embedding,
        }
    }
}

/// Equality filters applied at the SQL level before scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub category: Option<String>,
    pub source: Option<String>,
    pub parent_doc_id: Option<String>,
    pub has_embedding: Option<bool>,
}

/// A chunk paired with its cosine similarity to a query. Higher is better.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// Best-first semantic search over an index.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Top `k` chunks for `query`, best first. Equal scores keep storage
    /// order, so results are deterministic for a fixed index.
    async fn search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> anyhow::Result<Vec<ScoredChunk>>;

    /// Whether the index can serve queries: built to completion with at
    /// least one embedded chunk.
    async fn ready(&self) -> anyhow::Result<bool>;
}
