use crate::document::Document;
use crate::error::{ChunkError, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Load a corpus from a JSON file containing an array of documents.
///
/// Documents with empty text are logged and dropped rather than failing the
/// whole load.
pub fn load_documents(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ChunkError::CorpusNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(path)?;
    let documents = parse_documents(&raw)?;
    tracing::info!("Loaded {} documents from {}", documents.len(), path.display());
    Ok(documents)
}

/// Same as [`load_documents`] but reads from any `Read` source, e.g. stdin.
pub fn load_documents_from_reader(mut reader: impl Read) -> Result<Vec<Document>> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    parse_documents(&raw)
}

fn parse_documents(raw: &str) -> Result<Vec<Document>> {
    let parsed: Vec<Document> = serde_json::from_str(raw)?;
    let mut documents = Vec::with_capacity(parsed.len());
    for document in parsed {
        if document.text.is_empty() {
            tracing::warn!("Empty text content for document id: {}", document.id);
            continue;
        }
        documents.push(document);
    }
    Ok(documents)
}
