use crate::document::DocumentChunk;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Summary statistics over a batch of chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub chunks_by_source: BTreeMap<String, usize>,
    pub chunks_by_category: BTreeMap<String, usize>,
}

impl ChunkStatistics {
    pub fn from_chunks(chunks: &[DocumentChunk]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }
        let sizes: Vec<usize> = chunks.iter().map(|c| c.metadata.chunk_size).collect();
        let total_characters: usize = sizes.iter().sum();
        let mut chunks_by_source = BTreeMap::new();
        let mut chunks_by_category = BTreeMap::new();
        for chunk in chunks {
            *chunks_by_source
                .entry(chunk.metadata.source.clone())
                .or_insert(0) += 1;
            *chunks_by_category
                .entry(chunk.metadata.category.clone())
                .or_insert(0) += 1;
        }
        Self {
            total_chunks: chunks.len(),
            total_characters,
            avg_chunk_size: total_characters as f64 / chunks.len() as f64,
            min_chunk_size: sizes.iter().copied().min().unwrap_or(0),
            max_chunk_size: sizes.iter().copied().max().unwrap_or(0),
            chunks_by_source,
            chunks_by_category,
        }
    }
}

/// Write chunks as pretty-printed JSON, creating parent directories as
/// needed.
pub fn write_chunks_json(chunks: &[DocumentChunk], output_path: impl AsRef<Path>) -> Result<()> {
    let path = output_path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(chunks)?;
    fs::write(path, json)?;
    tracing::info!("Saved {} chunks to {}", chunks.len(), path.display());
    Ok(())
}
