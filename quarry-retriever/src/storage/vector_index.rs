//! Vector search over the chunk database, plus the metadata recording which
//! embedding model built the index and whether the build completed.
//!
//! Search is brute force: every embedded chunk is scored with cosine
//! similarity and the top results returned. For corpus sizes this pipeline
//! targets (thousands of chunks) that is faster than maintaining an
//! approximate nearest neighbor structure.

use super::{ChunkFilter, ChunkIndex, ScoredChunk, SimilaritySearch};
use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use quarry_embed::{EmbeddingProvider, convert_to_f16};
use sqlx::Row;
use std::cmp::Ordering;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Identity of the embedding model an index was built with.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EmbeddingModelInfo {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
    pub normalized: bool,
}

impl EmbeddingModelInfo {
    /// Stable identifier, e.g. "fastembed:all-minilm-l6-v2:384:norm".
    pub fn model_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.provider,
            self.model_name,
            self.dimension,
            if self.normalized { "norm" } else { "raw" }
        )
    }
}

/// Completeness marker written once a build finishes. An index without this
/// row is treated as absent or interrupted.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexMetadata {
    pub model_id: String,
    pub documents_count: i64,
    pub chunks_count: i64,
    pub created_at: i64,
    pub crate_version: String,
}

/// Row counts across the index tables.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexStats {
    pub documents_count: i64,
    pub chunks_count: i64,
    pub embeddings_count: i64,
    pub models_count: i64,
}

/// Results of the health probes the status command runs.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IndexHealth {
    pub database_connected: bool,
    pub database_integrity_ok: bool,
    pub complete: bool,
    pub embedded_chunks: i64,
}

/// Chunk database plus an optional embedding provider: the searchable index.
///
/// Derefs to [`ChunkIndex`] for raw row access. The provider is only needed
/// for query paths; stats and health checks work without one.
pub struct VectorIndex {
    index: ChunkIndex,
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("index", &self.index)
            .field(
                "provider",
                &self.provider.as_ref().map(|p| p.provider_name()),
            )
            .finish()
    }
}

impl VectorIndex {
    /// Open the index under `base_dir` without an embedding provider.
    pub async fn open(base_dir: &Path) -> Result<Self> {
        let index = ChunkIndex::open(base_dir).await?;
        Self::from_chunk_index(index).await
    }

    /// In-memory index, mainly for tests.
    pub async fn open_memory() -> Result<Self> {
        let index = ChunkIndex::open_memory().await?;
        Self::from_chunk_index(index).await
    }

    async fn from_chunk_index(index: ChunkIndex) -> Result<Self> {
        let vector_index = Self {
            index,
            provider: None,
        };
        vector_index.create_metadata_tables().await?;
        Ok(vector_index)
    }

    /// Attach the provider used to embed queries.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.provider.clone()
    }

    async fn create_metadata_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embedding_models (
                model_id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                model_name TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                normalized INTEGER NOT NULL,
                registered_at INTEGER NOT NULL
            )",
        )
        .execute(self.index.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                model_id TEXT NOT NULL,
                documents_count INTEGER NOT NULL,
                chunks_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                crate_version TEXT NOT NULL
            )",
        )
        .execute(self.index.pool())
        .await?;
        Ok(())
    }

    pub async fn register_model(&self, info: &EmbeddingModelInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO embedding_models (model_id, provider, model_name, dimension, normalized, registered_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(model_id) DO UPDATE SET registered_at = excluded.registered_at",
        )
        .bind(info.model_id())
        .bind(&info.provider)
        .bind(&info.model_name)
        .bind(info.dimension as i64)
        .bind(info.normalized)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.index.pool())
        .await?;
        Ok(())
    }

    pub async fn get_registered_models(&self) -> Result<Vec<EmbeddingModelInfo>> {
        let rows = sqlx::query(
            "SELECT provider, model_name, dimension, normalized FROM embedding_models
             ORDER BY registered_at, model_id",
        )
        .fetch_all(self.index.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|row| EmbeddingModelInfo {
                provider: row.get("provider"),
                model_name: row.get("model_name"),
                dimension: row.get::<i64, _>("dimension") as usize,
                normalized: row.get("normalized"),
            })
            .collect())
    }

    /// Record that a build finished, capturing current row counts.
    pub async fn mark_complete(&self, model_id: &str) -> Result<()> {
        let documents_count = self.index.document_count().await?;
        let chunks_count = self.index.chunk_count().await?;
        sqlx::query(
            "INSERT INTO index_metadata (id, model_id, documents_count, chunks_count, created_at, crate_version)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                model_id = excluded.model_id,
                documents_count = excluded.documents_count,
                chunks_count = excluded.chunks_count,
                created_at = excluded.created_at,
                crate_version = excluded.crate_version",
        )
        .bind(model_id)
        .bind(documents_count)
        .bind(chunks_count)
        .bind(chrono::Utc::now().timestamp())
        .bind(env!("CARGO_PKG_VERSION"))
        .execute(self.index.pool())
        .await?;
        Ok(())
    }

    /// The completeness marker, `None` for a fresh or interrupted index.
    pub async fn metadata(&self) -> Result<Option<IndexMetadata>> {
        let row = sqlx::query(
            "SELECT model_id, documents_count, chunks_count, created_at, crate_version
             FROM index_metadata WHERE id = 1",
        )
        .fetch_optional(self.index.pool())
        .await?;
        Ok(row.map(|row| IndexMetadata {
            model_id: row.get("model_id"),
            documents_count: row.get("documents_count"),
            chunks_count: row.get("chunks_count"),
            created_at: row.get("created_at"),
            crate_version: row.get("crate_version"),
        }))
    }

    /// Drop the completeness marker and all stored rows.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM index_metadata")
            .execute(self.index.pool())
            .await?;
        self.index.clear_all().await
    }

    /// Brute-force cosine search over embedded chunks matching `filter`.
    pub async fn search_similar_chunks(
        &self,
        query_embedding: &[f16],
        limit: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let mut effective = filter.cloned().unwrap_or_default();
        effective.has_embedding = Some(true);
        let candidates = self.index.get_chunks(&effective).await?;
        let candidate_count = candidates.len();

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                let score = cosine_similarity(query_embedding, embedding);
                Some(ScoredChunk { chunk, score })
            })
            .collect();
        // Stable sort keeps storage order between equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        tracing::debug!(
            "Similarity search kept {} of {} candidates",
            scored.len(),
            candidate_count
        );
        Ok(scored)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let models_row = sqlx::query("SELECT COUNT(*) as count FROM embedding_models")
            .fetch_one(self.index.pool())
            .await?;
        Ok(IndexStats {
            documents_count: self.index.document_count().await?,
            chunks_count: self.index.chunk_count().await?,
            embeddings_count: self.index.embedded_chunk_count().await?,
            models_count: models_row.get("count"),
        })
    }

    pub async fn health(&self) -> Result<IndexHealth> {
        let database_connected = sqlx::query("SELECT 1")
            .fetch_one(self.index.pool())
            .await
            .is_ok();
        let database_integrity_ok = match sqlx::query("PRAGMA integrity_check")
            .fetch_one(self.index.pool())
            .await
        {
            Ok(row) => row.get::<String, _>(0) == "ok",
            Err(_) => false,
        };
        let complete = self.metadata().await.unwrap_or(None).is_some();
        let embedded_chunks = self.index.embedded_chunk_count().await.unwrap_or(0);
        Ok(IndexHealth {
            database_connected,
            database_integrity_ok,
            complete,
            embedded_chunks,
        })
    }
}

impl Deref for VectorIndex {
    type Target = ChunkIndex;

    fn deref(&self) -> &Self::Target {
        &self.index
    }
}

#[async_trait]
impl SimilaritySearch for VectorIndex {
    async fn search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        let Some(provider) = &self.provider else {
            anyhow::bail!("no embedding provider attached to the index");
        };
        let embedding = provider
            .embed_text(query)
            .await
            .map_err(anyhow::Error::from)?;
        let mut converted = convert_to_f16(std::slice::from_ref(&embedding), true);
        let query_embedding = converted.pop().unwrap_or_default();
        self.search_similar_chunks(&query_embedding, k, filter).await
    }

    async fn ready(&self) -> Result<bool> {
        if self.metadata().await?.is_none() {
            return Ok(false);
        }
        Ok(self.index.embedded_chunk_count().await? > 0)
    }
}

/// Cosine similarity in f32 precision with a zero-norm guard. Mismatched
/// dimensions score zero rather than panic.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkRecord, StoredDocument};

    fn embedding(values: &[f32]) -> Vec<f16> {
        values.iter().map(|v| f16::from_f32(*v)).collect()
    }

    async fn seeded_index() -> VectorIndex {
        let index = VectorIndex::open_memory().await.unwrap();
        index
            .upsert_document(&StoredDocument {
                id: "doc-1".to_string(),
                source: "faq.json".to_string(),
                category: "tax".to_string(),
                content_hash: *blake3::hash(b"doc-1").as_bytes(),
                original_length: 100,
            })
            .await
            .unwrap();
        let chunks: Vec<ChunkRecord> = [
            ("doc-1_chunk_0", vec![1.0, 0.0], "tax"),
            ("doc-1_chunk_1", vec![0.9, 0.1], "tax"),
            ("doc-1_chunk_2", vec![0.0, 1.0], "legal"),
        ]
        .into_iter()
        .map(|(chunk_id, vector, category)| ChunkRecord {
            id: None,
            chunk_id: chunk_id.to_string(),
            parent_doc_id: "doc-1".to_string(),
            chunk_index: 0,
            total_chunks: 3,
            content: format!("content of {chunk_id}"),
            chunk_size: 20,
            source: "faq.json".to_string(),
            category: category.to_string(),
            original_length: 100,
            embedding: Some(embedding(&vector)),
        })
        .collect();
        index.upsert_chunks(&chunks).await.unwrap();
        index
    }

    #[test]
    fn test_cosine_similarity() {
        let a = embedding(&[1.0, 0.0, 0.0]);
        let b = embedding(&[1.0, 0.0, 0.0]);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-3);

        let orthogonal = embedding(&[0.0, 1.0, 0.0]);
        assert!(cosine_similarity(&a, &orthogonal).abs() < 1e-3);

        let opposite = embedding(&[-1.0, 0.0, 0.0]);
        assert!((cosine_similarity(&a, &opposite) + 1.0).abs() < 1e-3);

        let zero = embedding(&[0.0, 0.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);

        let mismatched = embedding(&[1.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &mismatched), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = seeded_index().await;
        let results = index
            .search_similar_chunks(&embedding(&[1.0, 0.0]), 10, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.chunk_id, "doc-1_chunk_0");
        assert_eq!(results[1].chunk.chunk_id, "doc-1_chunk_1");
        assert_eq!(results[2].chunk.chunk_id, "doc-1_chunk_2");
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > results[2].score);
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_filter() {
        let index = seeded_index().await;
        let results = index
            .search_similar_chunks(&embedding(&[1.0, 0.0]), 1, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        let filter = ChunkFilter {
            category: Some("legal".to_string()),
            ..Default::default()
        };
        let results = index
            .search_similar_chunks(&embedding(&[1.0, 0.0]), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "doc-1_chunk_2");
    }

    #[tokio::test]
    async fn test_equal_scores_keep_storage_order() {
        let index = VectorIndex::open_memory().await.unwrap();
        index
            .upsert_document(&StoredDocument {
                id: "doc-1".to_string(),
                source: "faq.json".to_string(),
                category: "tax".to_string(),
                content_hash: *blake3::hash(b"doc-1").as_bytes(),
                original_length: 100,
            })
            .await
            .unwrap();
        let chunks: Vec<ChunkRecord> = (0..4)
            .map(|i| ChunkRecord {
                id: None,
                chunk_id: format!("doc-1_chunk_{i}"),
                parent_doc_id: "doc-1".to_string(),
                chunk_index: i,
                total_chunks: 4,
                content: format!("content {i}"),
                chunk_size: 10,
                source: "faq.json".to_string(),
                category: "tax".to_string(),
                original_length: 100,
                embedding: Some(embedding(&[1.0, 0.0])),
            })
            .collect();
        index.upsert_chunks(&chunks).await.unwrap();

        let results = index
            .search_similar_chunks(&embedding(&[1.0, 0.0]), 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["doc-1_chunk_0", "doc-1_chunk_1", "doc-1_chunk_2", "doc-1_chunk_3"]
        );
    }

    #[tokio::test]
    async fn test_completeness_marker_controls_readiness() {
        let index = seeded_index().await;
        assert!(!index.ready().await.unwrap());
        assert!(index.metadata().await.unwrap().is_none());

        let info = EmbeddingModelInfo {
            provider: "fastembed".to_string(),
            model_name: "all-minilm-l6-v2".to_string(),
            dimension: 2,
            normalized: true,
        };
        index.register_model(&info).await.unwrap();
        index.mark_complete(&info.model_id()).await.unwrap();

        assert!(index.ready().await.unwrap());
        let metadata = index.metadata().await.unwrap().unwrap();
        assert_eq!(metadata.model_id, "fastembed:all-minilm-l6-v2:2:norm");
        assert_eq!(metadata.documents_count, 1);
        assert_eq!(metadata.chunks_count, 3);

        let models = index.get_registered_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0], info);

        index.reset().await.unwrap();
        assert!(!index.ready().await.unwrap());
        assert_eq!(index.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_marker_alone_is_not_ready_without_embeddings() {
        let index = VectorIndex::open_memory().await.unwrap();
        index.mark_complete("fastembed:test:2:norm").await.unwrap();
        assert!(!index.ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_health_on_fresh_index() {
        let index = VectorIndex::open_memory().await.unwrap();
        let health = index.health().await.unwrap();
        assert!(health.database_connected);
        assert!(health.database_integrity_ok);
        assert!(!health.complete);
        assert_eq!(health.embedded_chunks, 0);
    }

    #[tokio::test]
    async fn test_search_without_provider_fails() {
        let index = seeded_index().await;
        let err = index.search_with_score("anything", 5, None).await.unwrap_err();
        assert!(err.to_string().contains("no embedding provider"));
    }
}
