pub mod chunker;
pub mod document;
pub mod error;
pub mod loader;
pub mod stats;

// Re-export the main chunking types for external use
pub use chunker::{ChunkerConfig, TextChunker, default_separators};
pub use document::{ChunkMetadata, Document, DocumentChunk, DocumentMetadata};
pub use error::{ChunkError, Result};
pub use loader::{load_documents, load_documents_from_reader};
pub use stats::{ChunkStatistics, write_chunks_json};
