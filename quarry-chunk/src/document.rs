use serde::{Deserialize, Serialize};

fn unknown() -> String {
    "unknown".to_string()
}

/// Metadata carried by a corpus document. Unknown keys are preserved in
/// `extra` and copied onto every chunk produced from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A corpus document as it appears in the input JSON array.
///
/// Every field is optional on the wire: a missing id becomes "unknown" and
/// missing text becomes the empty string (such documents are skipped at
/// load time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "unknown")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    /// Source name, falling back to "unknown" when absent.
    pub fn source(&self) -> String {
        self.metadata.source.clone().unwrap_or_else(unknown)
    }

    /// Category name, falling back to "unknown" when absent.
    pub fn category(&self) -> String {
        self.metadata.category.clone().unwrap_or_else(unknown)
    }
}

/// Provenance metadata attached to every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Position of this chunk within its parent document (0-based)
    pub chunk_index: usize,
    /// Number of chunks the parent document produced
    pub total_chunks: usize,
    /// Id of the parent document
    pub parent_doc_id: String,
    /// Size of this chunk in characters
    pub chunk_size: usize,
    /// Length of the parent document text in characters
    pub original_length: usize,
    pub source: String,
    pub category: String,
    /// Extra metadata keys inherited from the parent document
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A contiguous slice of a parent document, sized for embedding.
///
/// Chunk ids are derived from the parent document id and the chunk position,
/// so re-chunking the same corpus always reproduces the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Format the id for the chunk at `chunk_index` of document `parent_doc_id`.
    pub fn format_id(parent_doc_id: &str, chunk_index: usize) -> String {
        format!("{parent_doc_id}_chunk_{chunk_index}")
    }
}
