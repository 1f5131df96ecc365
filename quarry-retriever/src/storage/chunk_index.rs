//! SQLite persistence for documents and chunks.
//!
//! Schema:
//!
//! ```text
//! documents(id TEXT PK, source, category, content_hash BLOB,
//!           original_length, created_at)
//! chunks(id INTEGER PK, chunk_id TEXT UNIQUE, parent_doc_id -> documents.id,
//!        chunk_index, total_chunks, content, chunk_size, source, category,
//!        original_length, embedding BLOB NULL)
//! ```
//!
//! Embeddings are stored as little-endian f16 blobs. Deleting a document
//! cascades to its chunks.

use super::{ChunkFilter, ChunkRecord, StoredDocument};
use anyhow::Result;
use half::f16;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DATABASE_FILE: &str = "quarry.db";

/// Handle to the on-disk chunk database. Cloning shares the pool.
#[derive(Clone, Debug)]
pub struct ChunkIndex {
    pool: SqlitePool,
}

impl ChunkIndex {
    /// Open (creating if needed) the index database under `base_dir`.
    pub async fn open(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let db_path = base_dir.join(DATABASE_FILE);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .auto_vacuum(SqliteAutoVacuum::Full)
            .page_size(1 << 16)
            .optimize_on_close(true, Some(1 << 10));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let index = Self { pool };
        index.create_tables().await?;
        Ok(index)
    }

    /// In-memory database, mainly for tests. Restricted to one connection
    /// since every SQLite memory connection is its own database.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let index = Self { pool };
        index.create_tables().await?;
        Ok(index)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                content_hash BLOB NOT NULL,
                original_length INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL UNIQUE,
                parent_doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                content TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                original_length INTEGER NOT NULL,
                embedding BLOB,
                FOREIGN KEY (parent_doc_id) REFERENCES documents(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_parent ON chunks(parent_doc_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_category ON chunks(category)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_document(&self, document: &StoredDocument) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, source, category, content_hash, original_length, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                category = excluded.category,
                content_hash = excluded.content_hash,
                original_length = excluded.original_length",
        )
        .bind(&document.id)
        .bind(&document.source)
        .bind(&document.category)
        .bind(document.content_hash.as_slice())
        .bind(document.original_length as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a batch of chunks in one transaction.
    pub async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let embedding_bytes = chunk
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<f16, u8>(e).to_vec());
            sqlx::query(
                "INSERT INTO chunks (chunk_id, parent_doc_id, chunk_index, total_chunks, content,
                                     chunk_size, source, category, original_length, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    parent_doc_id = excluded.parent_doc_id,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    content = excluded.content,
                    chunk_size = excluded.chunk_size,
                    source = excluded.source,
                    category = excluded.category,
                    original_length = excluded.original_length,
                    embedding = excluded.embedding",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.parent_doc_id)
            .bind(chunk.chunk_index as i64)
            .bind(chunk.total_chunks as i64)
            .bind(&chunk.content)
            .bind(chunk.chunk_size as i64)
            .bind(&chunk.source)
            .bind(&chunk.category)
            .bind(chunk.original_length as i64)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, source, category, content_hash, original_length FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Self::document_from_row(&row)))
    }

    pub async fn get_all_documents(&self) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, source, category, content_hash, original_length FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::document_from_row).collect())
    }

    pub async fn get_chunk_by_chunk_id(&self, chunk_id: &str) -> Result<Option<ChunkRecord>> {
        let row = sqlx::query(&format!("{CHUNK_COLUMNS} WHERE chunk_id = ?"))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Self::chunk_from_row(&row)))
    }

    /// Fetch chunks matching `filter`, in storage (insertion) order.
    pub async fn get_chunks(&self, filter: &ChunkFilter) -> Result<Vec<ChunkRecord>> {
        let mut sql = String::from(CHUNK_COLUMNS);
        let mut clauses: Vec<&str> = Vec::new();
        if filter.category.is_some() {
            clauses.push("category = ?");
        }
        if filter.source.is_some() {
            clauses.push("source = ?");
        }
        if filter.parent_doc_id.is_some() {
            clauses.push("parent_doc_id = ?");
        }
        match filter.has_embedding {
            Some(true) => clauses.push("embedding IS NOT NULL"),
            Some(false) => clauses.push("embedding IS NULL"),
            None => {}
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        if let Some(category) = &filter.category {
            query = query.bind(category);
        }
        if let Some(source) = &filter.source {
            query = query.bind(source);
        }
        if let Some(parent) = &filter.parent_doc_id {
            query = query.bind(parent);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::chunk_from_row).collect())
    }

    pub async fn document_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn embedded_chunk_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM chunks WHERE embedding IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn count_chunks_by_category(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) as count FROM chunks GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("category"), row.get("count")))
            .collect())
    }

    pub async fn count_chunks_by_source(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) as count FROM chunks GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("source"), row.get("count")))
            .collect())
    }

    /// Aggregate chunk size figures, `None` for an empty table.
    pub async fn chunk_size_summary(&self) -> Result<Option<ChunkSizeSummary>> {
        let row = sqlx::query(
            "SELECT AVG(chunk_size) as avg_size, MIN(chunk_size) as min_size,
                    MAX(chunk_size) as max_size, SUM(chunk_size) as total_size
             FROM chunks",
        )
        .fetch_one(&self.pool)
        .await?;
        let avg: Option<f64> = row.get("avg_size");
        Ok(avg.map(|avg_chunk_size| ChunkSizeSummary {
            avg_chunk_size,
            min_chunk_size: row.get("min_size"),
            max_chunk_size: row.get("max_size"),
            total_characters: row.get("total_size"),
        }))
    }

    /// Delete all documents and chunks.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    fn document_from_row(row: &SqliteRow) -> StoredDocument {
        let hash_bytes: Vec<u8> = row.get("content_hash");
        let mut content_hash = [0u8; 32];
        let len = hash_bytes.len().min(32);
        content_hash[..len].copy_from_slice(&hash_bytes[..len]);
        StoredDocument {
            id: row.get("id"),
            source: row.get("source"),
            category: row.get("category"),
            content_hash,
            original_length: row.get::<i64, _>("original_length") as usize,
        }
    }

    fn chunk_from_row(row: &SqliteRow) -> ChunkRecord {
        let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
        ChunkRecord {
            id: Some(row.get("id")),
            chunk_id: row.get("chunk_id"),
            parent_doc_id: row.get("parent_doc_id"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            total_chunks: row.get::<i64, _>("total_chunks") as usize,
            content: row.get("content"),
            chunk_size: row.get::<i64, _>("chunk_size") as usize,
            source: row.get("source"),
            category: row.get("category"),
            original_length: row.get::<i64, _>("original_length") as usize,
            embedding: embedding_bytes.map(|bytes| bytemuck::pod_collect_to_vec(&bytes)),
        }
    }
}

const CHUNK_COLUMNS: &str = "SELECT id, chunk_id, parent_doc_id, chunk_index, total_chunks, \
                             content, chunk_size, source, category, original_length, embedding \
                             FROM chunks";

/// Aggregate figures over the chunk table.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChunkSizeSummary {
    pub avg_chunk_size: f64,
    pub min_chunk_size: i64,
    pub max_chunk_size: i64,
    pub total_characters: i64,
}
