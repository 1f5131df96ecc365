//! One-shot build pipeline: corpus JSON -> chunks -> embeddings -> SQLite.
//!
//! A build either reuses a complete index, refuses to touch an incomplete
//! one (unless forced), or rebuilds from scratch. Per-document failures are
//! counted and logged but never abort the build, and a document whose
//! embedding fails is still stored so a later pass can embed it.

use crate::storage::{ChunkRecord, EmbeddingModelInfo, StoredDocument, VectorIndex};
use anyhow::{Context, Result};
use quarry_chunk::{ChunkerConfig, Document, TextChunker, load_documents};
use quarry_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider, convert_to_f16};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for an index build.
#[derive(Debug, Clone)]
pub struct IndexBuilderConfig {
    pub base_dir: PathBuf,
    pub chunker: ChunkerConfig,
    pub embedding: EmbedConfig,
    /// Clear any existing index instead of reusing or refusing it
    pub force_rebuild: bool,
}

impl IndexBuilderConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            chunker: ChunkerConfig::default(),
            embedding: EmbedConfig::default(),
            force_rebuild: false,
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_force_rebuild(mut self, force_rebuild: bool) -> Self {
        self.force_rebuild = force_rebuild;
        self
    }
}

/// Counters tracked across a build.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BuildStats {
    pub documents_loaded: usize,
    pub documents_failed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub errors: usize,
}

/// Drives a full index build.
pub struct IndexBuilder {
    config: IndexBuilderConfig,
    index: VectorIndex,
    stats: Arc<RwLock<BuildStats>>,
}

impl IndexBuilder {
    /// Open the index and initialize the configured fastembed model.
    pub async fn new(config: IndexBuilderConfig) -> Result<Self> {
        let provider = FastEmbedProvider::create(config.embedding.clone()).await?;
        Self::with_provider(config, Arc::new(provider)).await
    }

    /// Variant taking a pre-built provider.
    pub async fn with_provider(
        config: IndexBuilderConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let index = VectorIndex::open(&config.base_dir)
            .await?
            .with_provider(provider);
        Ok(Self {
            config,
            index,
            stats: Arc::new(RwLock::new(BuildStats::default())),
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn into_index(self) -> VectorIndex {
        self.index
    }

    pub async fn stats(&self) -> BuildStats {
        self.stats.read().await.clone()
    }

    /// Build from a corpus file, honoring the completeness marker: a
    /// complete index is reused, an incomplete one is an error unless the
    /// build is forced.
    pub async fn build_from_path(&self, corpus: &Path) -> Result<BuildStats> {
        if !self.config.force_rebuild {
            if let Some(metadata) = self.index.metadata().await? {
                tracing::info!(
                    "Using existing index ({} chunks, model {})",
                    metadata.chunks_count,
                    metadata.model_id
                );
                return Ok(self.stats().await);
            }
            if self.index.chunk_count().await? > 0 {
                anyhow::bail!(
                    "index database exists but is incomplete; rebuild with force enabled"
                );
            }
        }
        let documents = load_documents(corpus)?;
        self.build_from_documents(&documents).await
    }

    /// Build from already-loaded documents, replacing any existing index.
    pub async fn build_from_documents(&self, documents: &[Document]) -> Result<BuildStats> {
        if self.config.force_rebuild {
            tracing::info!("Clearing existing index before rebuild");
            self.index.reset().await?;
        }
        let chunker = TextChunker::new(self.config.chunker.clone())?;
        let provider = self
            .index
            .provider()
            .context("index builder requires an embedding provider")?;

        tracing::info!("Indexing {} documents", documents.len());
        for document in documents {
            match self.process_document(&chunker, provider.as_ref(), document).await {
                Ok(()) => {
                    let mut stats = self.stats.write().await;
                    stats.documents_loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to index document {}: {e:#}", document.id);
                    let mut stats = self.stats.write().await;
                    stats.documents_failed += 1;
                    stats.errors += 1;
                }
            }
        }

        let model_info = EmbeddingModelInfo {
            provider: provider.provider_name().to_string(),
            model_name: self.config.embedding.model_name.clone(),
            dimension: provider.dimension(),
            normalized: self.config.embedding.normalize,
        };
        self.index.register_model(&model_info).await?;
        self.index.mark_complete(&model_info.model_id()).await?;

        let stats = self.stats().await;
        tracing::info!(
            "Index build complete: {} documents, {} chunks, {} embeddings, {} errors",
            stats.documents_loaded,
            stats.chunks_created,
            stats.embeddings_generated,
            stats.errors
        );
        Ok(stats)
    }

    async fn process_document(
        &self,
        chunker: &TextChunker,
        provider: &dyn EmbeddingProvider,
        document: &Document,
    ) -> Result<()> {
        let chunks = chunker.chunk_document(document)?;
        let first = chunks.first().context("document produced no chunks")?;

        let stored = StoredDocument {
            id: document.id.clone(),
            source: first.metadata.source.clone(),
            category: first.metadata.category.clone(),
            content_hash: *blake3::hash(document.text.as_bytes()).as_bytes(),
            original_length: first.metadata.original_length,
        };

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = match provider.embed_texts(&contents).await {
            Ok(result) => Some(convert_to_f16(
                &result.embeddings,
                self.config.embedding.normalize,
            )),
            Err(e) => {
                tracing::warn!(
                    "Embedding failed for document {}; storing chunks without embeddings: {e}",
                    document.id
                );
                let mut stats = self.stats.write().await;
                stats.errors += 1;
                None
            }
        };

        self.index.upsert_document(&stored).await?;
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let embedding = embeddings.as_ref().and_then(|e| e.get(i).cloned());
                ChunkRecord::from_document_chunk(chunk, embedding)
            })
            .collect();
        self.index.upsert_chunks(&records).await?;

        let embedded = records.iter().filter(|r| r.embedding.is_some()).count();
        let mut stats = self.stats.write().await;
        stats.chunks_created += records.len();
        stats.embeddings_generated += embedded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SimilaritySearch;
    use async_trait::async_trait;
    use quarry_embed::{EmbeddingResult, Result as EmbedResult};

    /// Keyword-axis embeddings: deterministic and cheap, with similarity
    /// that tracks shared topic words.
    struct KeywordProvider;

    const AXES: [&str; 4] = ["tax", "retirement", "contract", "budget"];

    fn keyword_embed(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        AXES.iter()
            .map(|axis| if lower.contains(axis) { 1.0 } else { 0.0 })
            .collect()
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordProvider {
        async fn embed_text(&self, text: &str) -> EmbedResult<Vec<f32>> {
            Ok(keyword_embed(text))
        }

        async fn embed_texts(&self, texts: &[String]) -> EmbedResult<EmbeddingResult> {
            Ok(EmbeddingResult::new(
                texts.iter().map(|t| keyword_embed(t)).collect(),
            ))
        }

        fn dimension(&self) -> usize {
            AXES.len()
        }

        fn provider_name(&self) -> &str {
            "keyword-test"
        }
    }

    /// A provider whose embedding always fails.
    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        async fn embed_text(&self, _text: &str) -> EmbedResult<Vec<f32>> {
            Err(quarry_embed::EmbedError::embedding_gen("backend offline"))
        }

        async fn embed_texts(&self, _texts: &[String]) -> EmbedResult<EmbeddingResult> {
            Err(quarry_embed::EmbedError::embedding_gen("backend offline"))
        }

        fn dimension(&self) -> usize {
            4
        }

        fn provider_name(&self) -> &str {
            "broken-test"
        }
    }

    fn sample_documents() -> Vec<Document> {
        vec![
            Document::new("tax-1", "Estimated tax payments are due quarterly.")
                .with_source("faq.json")
                .with_category("tax"),
            Document::new("retire-1", "A retirement account defers income tax.")
                .with_source("faq.json")
                .with_category("retirement"),
            Document::new("blank", "   "),
        ]
    }

    async fn builder_in(dir: &Path, force: bool) -> IndexBuilder {
        let config = IndexBuilderConfig::new(dir).with_force_rebuild(force);
        IndexBuilder::with_provider(config, Arc::new(KeywordProvider))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_counts_and_marks_complete() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path(), false).await;
        let stats = builder.build_from_documents(&sample_documents()).await.unwrap();

        assert_eq!(stats.documents_loaded, 2);
        assert_eq!(stats.documents_failed, 1);
        assert_eq!(stats.chunks_created, 2);
        assert_eq!(stats.embeddings_generated, 2);
        assert_eq!(stats.errors, 1);

        let index = builder.index();
        assert!(index.ready().await.unwrap());
        let metadata = index.metadata().await.unwrap().unwrap();
        assert_eq!(metadata.model_id, "keyword-test:all-minilm-l6-v2:4:norm");
        assert_eq!(metadata.documents_count, 2);

        let doc = index.get_document("tax-1").await.unwrap().unwrap();
        assert_eq!(doc.category, "tax");
        assert_eq!(
            doc.content_hash,
            *blake3::hash(b"Estimated tax payments are due quarterly.").as_bytes()
        );
    }

    #[tokio::test]
    async fn test_built_index_is_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path(), false).await;
        builder.build_from_documents(&sample_documents()).await.unwrap();

        let results = builder
            .index()
            .search_with_score("how much tax do I owe", 5, None)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.parent_doc_id, "tax-1");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_existing_complete_index_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.json");
        std::fs::write(&corpus, serde_json::to_string(&sample_documents()).unwrap()).unwrap();

        let builder = builder_in(dir.path(), false).await;
        let first = builder.build_from_path(&corpus).await.unwrap();
        assert_eq!(first.documents_loaded, 2);

        // A second unforced build leaves the index alone.
        let builder = builder_in(dir.path(), false).await;
        let second = builder.build_from_path(&corpus).await.unwrap();
        assert_eq!(second.documents_loaded, 0);
        assert_eq!(builder.index().chunk_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_incomplete_index_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.json");
        std::fs::write(&corpus, serde_json::to_string(&sample_documents()).unwrap()).unwrap();

        // Simulate an interrupted build: chunks on disk, no marker.
        {
            let builder = builder_in(dir.path(), false).await;
            let chunker = TextChunker::new(ChunkerConfig::default()).unwrap();
            let doc = Document::new("doc-1", "leftover partial state");
            let chunk = &chunker.chunk_document(&doc).unwrap()[0];
            builder
                .index()
                .upsert_document(&StoredDocument {
                    id: doc.id.clone(),
                    source: "unknown".to_string(),
                    category: "unknown".to_string(),
                    content_hash: *blake3::hash(doc.text.as_bytes()).as_bytes(),
                    original_length: 22,
                })
                .await
                .unwrap();
            builder
                .index()
                .upsert_chunks(&[ChunkRecord::from_document_chunk(chunk, None)])
                .await
                .unwrap();
        }

        let builder = builder_in(dir.path(), false).await;
        let err = builder.build_from_path(&corpus).await.unwrap_err();
        assert!(err.to_string().contains("incomplete"));

        // Forcing clears the leftovers and rebuilds.
        let builder = builder_in(dir.path(), true).await;
        let stats = builder.build_from_path(&corpus).await.unwrap();
        assert_eq!(stats.documents_loaded, 2);
        assert!(builder.index().get_document("doc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_embedding_failure_stores_chunks_unembedded() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexBuilderConfig::new(dir.path());
        let builder = IndexBuilder::with_provider(config, Arc::new(BrokenProvider))
            .await
            .unwrap();
        let stats = builder.build_from_documents(&sample_documents()).await.unwrap();

        assert_eq!(stats.documents_loaded, 2);
        assert_eq!(stats.chunks_created, 2);
        assert_eq!(stats.embeddings_generated, 0);
        // One error per failed embedding plus one for the blank document.
        assert_eq!(stats.errors, 3);
        assert!(logs_contain("storing chunks without embeddings"));

        // Chunks are stored but nothing is embedded, so the index is not
        // ready to serve queries.
        assert_eq!(builder.index().chunk_count().await.unwrap(), 2);
        assert!(!builder.index().ready().await.unwrap());
    }
}
