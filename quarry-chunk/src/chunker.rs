use crate::document::{ChunkMetadata, Document, DocumentChunk};
use crate::error::{ChunkError, Result};
use regex::Regex;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separators tried in order when splitting prose. The empty string is a
/// sentinel meaning "cut at a fixed character width".
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Configuration for the text chunker.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Characters of trailing context carried into the next chunk
    pub chunk_overlap: usize,
    /// Separators tried in order, coarsest first
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: default_separators(),
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkError::invalid_config("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits document text into overlapping chunks.
///
/// Splitting happens in two phases. First the text is broken into pieces by
/// trying each configured separator in order: pieces still larger than the
/// chunk size are re-split with the next finer separator, and the empty
/// separator falls back to fixed-width cuts. Each separator occurrence stays
/// attached to the end of the piece it terminates, so concatenating the
/// pieces reproduces the input exactly. Second, consecutive pieces are merged
/// greedily up to the chunk size; when a chunk fills up, the last
/// `chunk_overlap` characters of it seed the next chunk.
pub struct TextChunker {
    config: ChunkerConfig,
    patterns: Vec<Option<Regex>>,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        let patterns = config
            .separators
            .iter()
            .map(|sep| {
                if sep.is_empty() {
                    Ok(None)
                } else {
                    Regex::new(&regex::escape(sep)).map(Some).map_err(|e| {
                        ChunkError::invalid_config(format!("bad separator {sep:?}: {e}"))
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, patterns })
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default()).expect("default chunker config is valid")
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    ///
    /// Text that already fits in one chunk is returned unchanged. All sizes
    /// are character counts, never bytes, so multi-byte text is never cut
    /// mid-character.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if char_len(text) <= self.config.chunk_size {
            return vec![text.to_string()];
        }
        let mut pieces = Vec::new();
        self.split_recursive(text, 0, &mut pieces);
        self.merge_pieces(pieces)
    }

    /// Phase one: break `text` into pieces no larger than the chunk size,
    /// keeping every separator attached to the piece it ends.
    fn split_recursive<'a>(&self, text: &'a str, sep_idx: usize, out: &mut Vec<&'a str>) {
        if char_len(text) <= self.config.chunk_size {
            out.push(text);
            return;
        }
        let Some(slot) = self.patterns.get(sep_idx) else {
            // Separators exhausted without a hard-cut sentinel configured.
            hard_cut(text, self.config.chunk_size, out);
            return;
        };
        let Some(pattern) = slot else {
            hard_cut(text, self.config.chunk_size, out);
            return;
        };
        let mut bounds: Vec<usize> = pattern.find_iter(text).map(|m| m.end()).collect();
        if bounds.last() != Some(&text.len()) {
            bounds.push(text.len());
        }
        if bounds.len() <= 1 {
            // This separator does not subdivide the text; try the next one.
            self.split_recursive(text, sep_idx + 1, out);
            return;
        }
        let mut start = 0;
        for end in bounds {
            let piece = &text[start..end];
            if char_len(piece) > self.config.chunk_size {
                self.split_recursive(piece, sep_idx + 1, out);
            } else {
                out.push(piece);
            }
            start = end;
        }
    }

    /// Phase two: greedily merge pieces into chunks, seeding each new chunk
    /// with the tail of the previous one.
    fn merge_pieces(&self, pieces: Vec<&str>) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;
        for piece in pieces {
            let piece_chars = char_len(piece);
            if current_chars + piece_chars > size && !current.is_empty() {
                chunks.push(current);
                // The overlap shrinks when the incoming piece would not
                // otherwise fit beside it.
                let carry = overlap.min(size.saturating_sub(piece_chars));
                let tail = char_tail(&chunks[chunks.len() - 1], carry);
                current = tail.to_string();
                current_chars = char_len(&current);
            }
            current.push_str(piece);
            current_chars += piece_chars;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Chunk a single document, attaching provenance metadata to each chunk.
    pub fn chunk_document(&self, document: &Document) -> Result<Vec<DocumentChunk>> {
        if document.text.trim().is_empty() {
            return Err(ChunkError::empty_document(&document.id));
        }
        let original_length = char_len(&document.text);
        let source = document.source();
        let category = document.category();
        let pieces = self.split_text(&document.text);
        let total_chunks = pieces.len();
        tracing::debug!(
            "Chunked document {} into {} chunks ({} characters)",
            document.id,
            total_chunks,
            original_length
        );
        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| {
                let chunk_size = char_len(&content);
                DocumentChunk {
                    chunk_id: DocumentChunk::format_id(&document.id, chunk_index),
                    content,
                    metadata: ChunkMetadata {
                        chunk_index,
                        total_chunks,
                        parent_doc_id: document.id.clone(),
                        chunk_size,
                        original_length,
                        source: source.clone(),
                        category: category.clone(),
                        extra: document.metadata.extra.clone(),
                    },
                }
            })
            .collect())
    }

    /// Chunk a batch of documents. A document that fails to chunk is logged
    /// and skipped; it never aborts the batch.
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for (i, document) in documents.iter().enumerate() {
            match self.chunk_document(document) {
                Ok(mut doc_chunks) => chunks.append(&mut doc_chunks),
                Err(e) => {
                    tracing::warn!("Skipping document {}: {e}", document.id);
                    continue;
                }
            }
            if (i + 1) % 100 == 0 {
                tracing::debug!("Chunked {}/{} documents", i + 1, documents.len());
            }
        }
        tracing::info!(
            "Created {} chunks from {} documents",
            chunks.len(),
            documents.len()
        );
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `text` into consecutive pieces of at most `max_chars` characters,
/// always on character boundaries.
fn hard_cut<'a>(text: &'a str, max_chars: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            out.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

/// The last `n` characters of `s`, or all of `s` when it is shorter.
fn char_tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = s.chars().count();
    if total <= n {
        return s;
    }
    let start = s
        .char_indices()
        .nth(total - n)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph_text(units: usize, last_unit: &str) -> String {
        let mut text = String::new();
        for _ in 0..units {
            text.push_str(&"a".repeat(98));
            text.push_str("\n\n");
        }
        text.push_str(last_unit);
        text
    }

    #[test]
    fn test_short_text_is_a_single_chunk() {
        let chunker = TextChunker::with_defaults();
        let chunks = chunker.split_text("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_two_chunks_share_exact_overlap() {
        // 17 paragraph units of 100 characters plus a 100 character tail:
        // 1800 characters total, which packs into two 1000 character chunks.
        let text = paragraph_text(17, &"a".repeat(100));
        assert_eq!(text.chars().count(), 1800);

        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker.split_text(&text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 1000);
        // The second chunk opens with the last 200 characters of the first.
        assert_eq!(&chunks[1][..200], &chunks[0][800..]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let result = TextChunker::new(ChunkerConfig::new(100, 100));
        assert!(matches!(result, Err(ChunkError::InvalidConfig { .. })));

        let result = TextChunker::new(ChunkerConfig::new(100, 150));
        assert!(matches!(result, Err(ChunkError::InvalidConfig { .. })));

        assert!(TextChunker::new(ChunkerConfig::new(100, 0)).is_ok());
        assert!(TextChunker::new(ChunkerConfig::new(100, 99)).is_ok());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let result = TextChunker::new(ChunkerConfig::new(0, 0));
        assert!(matches!(result, Err(ChunkError::InvalidConfig { .. })));
    }

    #[test]
    fn test_chunks_reconstruct_input_without_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs. \
                    How vexingly quick daft zebras jump!\n\n\
                    Sphinx of black quartz, judge my vow. \
                    The five boxing wizards jump quickly."
            .repeat(8);
        let config = ChunkerConfig::new(120, 0);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 120));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_overlap_carries_previous_chunk_tail() {
        let config = ChunkerConfig::new(10, 5).with_separators(vec![" ".to_string()]);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text("aaaa bbbb cccc");
        assert_eq!(chunks, vec!["aaaa bbbb ".to_string(), "bbbb cccc".to_string()]);
    }

    #[test]
    fn test_overlap_shrinks_for_large_pieces() {
        // A 7 character piece leaves room for only 3 characters of carry in
        // a 10 character chunk, so the configured overlap of 5 shrinks.
        let config = ChunkerConfig::new(10, 5).with_separators(vec![" ".to_string()]);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text("aaa bbb ccccccc");
        assert_eq!(chunks, vec!["aaa bbb ".to_string(), "bb ccccccc".to_string()]);
    }

    #[test]
    fn test_hard_cut_respects_character_boundaries() {
        let text = "é".repeat(25);
        let config = ChunkerConfig::new(10, 0).with_separators(vec![String::new()]);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[1].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_hard_cut_fallback_without_sentinel() {
        // No separator matches and no empty sentinel is configured, so the
        // splitter falls back to fixed-width cuts anyway.
        let config = ChunkerConfig::new(10, 0).with_separators(vec!["|".to_string()]);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text(&"x".repeat(32));
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), "x".repeat(32));
    }

    #[test]
    fn test_chunk_document_metadata() {
        let text = paragraph_text(24, &"a".repeat(100));
        let original_length = text.chars().count();
        let doc = Document::new("doc-9", text)
            .with_source("guide.json")
            .with_category("tax");

        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker.chunk_document(&doc).unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, format!("doc-9_chunk_{i}"));
            assert_eq!(chunk.metadata.chunk_index, i);
            assert_eq!(chunk.metadata.total_chunks, chunks.len());
            assert_eq!(chunk.metadata.parent_doc_id, "doc-9");
            assert_eq!(chunk.metadata.chunk_size, chunk.content.chars().count());
            assert_eq!(chunk.metadata.original_length, original_length);
            assert_eq!(chunk.metadata.source, "guide.json");
            assert_eq!(chunk.metadata.category, "tax");
            assert!(chunk.content.chars().count() <= 1000);
        }
    }

    #[test]
    fn test_single_chunk_document() {
        let doc = Document::new("doc-1", "just a short note");
        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker.chunk_document(&doc).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "just a short note");
        assert_eq!(chunks[0].metadata.chunk_index, 0);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
        assert_eq!(chunks[0].metadata.source, "unknown");
        assert_eq!(chunks[0].metadata.category, "unknown");
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let doc = Document::new("doc-2", paragraph_text(30, "done"));
        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let first = chunker.chunk_document(&doc).unwrap();
        let second = chunker.chunk_document(&doc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let err = chunker.chunk_document(&Document::new("d1", "")).unwrap_err();
        assert!(matches!(err, ChunkError::EmptyDocument { id } if id == "d1"));

        let err = chunker
            .chunk_document(&Document::new("d2", "   \n\t  "))
            .unwrap_err();
        assert!(matches!(err, ChunkError::EmptyDocument { .. }));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_chunk_documents_skips_failures() {
        let docs = vec![
            Document::new("good-1", "first document body"),
            Document::new("bad", "  "),
            Document::new("good-2", "second document body"),
        ];
        let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
        let chunks = chunker.chunk_documents(&docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.parent_doc_id, "good-1");
        assert_eq!(chunks[1].metadata.parent_doc_id, "good-2");
        assert!(logs_contain("Skipping document bad"));
    }

    #[test]
    fn test_separator_stays_attached_to_preceding_piece() {
        let config = ChunkerConfig::new(8, 0).with_separators(vec!["\n".to_string()]);
        let chunker = TextChunker::new(config).unwrap();
        let chunks = chunker.split_text("alpha\nbeta\ngamma");
        assert_eq!(
            chunks,
            vec!["alpha\n".to_string(), "beta\n".to_string(), "gamma".to_string()]
        );
    }

    #[test]
    fn test_char_tail() {
        assert_eq!(char_tail("abcdef", 3), "def");
        assert_eq!(char_tail("abc", 5), "abc");
        assert_eq!(char_tail("abc", 0), "");
        assert_eq!(char_tail("héllo", 4), "éllo");
    }
}
