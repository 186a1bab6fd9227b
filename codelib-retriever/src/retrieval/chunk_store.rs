//! Durable SQLite storage for files, chunks, and embeddings.
//!
//! The store is the source of truth: the in-memory
//! [`VectorIndex`](super::vector_index::VectorIndex) is rebuilt from it on
//! open. File content is retained alongside chunks so a corrupt or stale
//! index can be regenerated by re-chunking and re-embedding without touching
//! the original files on disk.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE files (
//!     source_path TEXT PRIMARY KEY,
//!     hash BLOB NOT NULL,              -- blake3 of content (32 bytes)
//!     size INTEGER NOT NULL,
//!     content TEXT NOT NULL,           -- retained for rebuilds
//!     indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! CREATE TABLE chunks (
//!     id BLOB PRIMARY KEY,             -- deterministic chunk id (32 bytes)
//!     source_path TEXT NOT NULL REFERENCES files(source_path) ON DELETE CASCADE,
//!     language TEXT NOT NULL,
//!     start_line INTEGER NOT NULL,
//!     end_line INTEGER NOT NULL,
//!     content_hash BLOB NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB,                  -- f16 vector, NULL if embedding failed
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! CREATE TABLE index_meta (            -- singleton row tagging the model
//!     id INTEGER PRIMARY KEY CHECK (id = 1),
//!     model_id TEXT NOT NULL,
//!     dimension INTEGER NOT NULL,
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
//!     updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use codelib_chunk::{ChunkId, CodeChunk, Language};
use half::f16;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{EngineError, Result};

/// Database file name, created inside the library root.
pub const DB_FILE_NAME: &str = ".codelib.db";

/// A source file as persisted in the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub source_path: String,
    pub hash: [u8; 32],
    pub content: String,
}

/// A chunk as persisted in the store, with its embedding if one was produced.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: CodeChunk,
    pub embedding: Option<Vec<f16>>,
}

/// Metadata about a file row, without the retained content.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub source_path: String,
    pub size: usize,
    pub indexed_at: DateTime<Utc>,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub files: usize,
    pub chunks: usize,
    pub embedded_chunks: usize,
}

/// The model tag recorded when the index was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTag {
    pub model_id: String,
    pub dimension: usize,
}

/// SQLite-backed chunk and embedding storage.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    /// Opens persistent storage at `<base>/.codelib.db`, creating it if needed.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(DB_FILE_NAME);
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Opens in-memory storage for tests. The pool is pinned to a single
    /// connection: each in-memory connection is its own database.
    pub async fn open_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                source_path TEXT PRIMARY KEY,
                hash BLOB NOT NULL,
                size INTEGER NOT NULL,
                content TEXT NOT NULL,
                indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id BLOB PRIMARY KEY,
                source_path TEXT NOT NULL,
                language TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content_hash BLOB NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (source_path) REFERENCES files(source_path) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                model_id TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(source_path)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Replaces everything stored for a file in one transaction: the file row
    /// is upserted, its old chunks dropped, and the new chunks inserted. A
    /// reader never observes a half-replaced file.
    pub async fn replace_path(&self, file: &StoredFile, chunks: &[StoredChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (source_path, hash, size, content, indexed_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(source_path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                content = excluded.content,
                indexed_at = datetime('now')
            "#,
        )
        .bind(&file.source_path)
        .bind(&file.hash[..])
        .bind(file.content.len() as i64)
        .bind(&file.content)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE source_path = ?1")
            .bind(&file.source_path)
            .execute(&mut *tx)
            .await?;

        for stored in chunks {
            let chunk = &stored.chunk;
            let embedding_bytes = stored
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<f16, u8>(e));
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_path, language, start_line, end_line,
                                    content_hash, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id[..])
            .bind(&chunk.source_path)
            .bind(chunk.language.to_string())
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.content_hash[..])
            .bind(&chunk.text)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Removes a file and (via cascade) its chunks. Returns the number of
    /// chunks that were dropped.
    pub async fn delete_path(&self, source_path: &str) -> Result<usize> {
        let chunk_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunks WHERE source_path = ?1",
        )
        .bind(source_path)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("DELETE FROM files WHERE source_path = ?1")
            .bind(source_path)
            .execute(&self.pool)
            .await?;

        Ok(chunk_count as usize)
    }

    /// Returns the stored content hash for a path, if the file is indexed.
    pub async fn file_hash(&self, source_path: &str) -> Result<Option<[u8; 32]>> {
        let row = sqlx::query("SELECT hash FROM files WHERE source_path = ?1")
            .bind(source_path)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get("hash");
                Ok(Some(blob_to_hash(&bytes, "files.hash")?))
            }
            None => Ok(None),
        }
    }

    /// Loads every chunk in the store, embedded or not.
    pub async fn load_all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, source_path, language, start_line, end_line, content_hash, content, embedding
             FROM chunks ORDER BY source_path, start_line",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_stored_chunk).collect()
    }

    /// Loads the retained content of every stored file, for rebuilds.
    pub async fn load_file_contents(&self) -> Result<Vec<StoredFile>> {
        let rows = sqlx::query("SELECT source_path, hash, content FROM files ORDER BY source_path")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let hash_bytes: Vec<u8> = row.get("hash");
                Ok(StoredFile {
                    source_path: row.get("source_path"),
                    hash: blob_to_hash(&hash_bytes, "files.hash")?,
                    content: row.get("content"),
                })
            })
            .collect()
    }

    /// Lists indexed files without their content.
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT source_path, size, indexed_at FROM files ORDER BY source_path",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let size: i64 = row.get("size");
                FileRecord {
                    source_path: row.get("source_path"),
                    size: size as usize,
                    indexed_at: row.get("indexed_at"),
                }
            })
            .collect())
    }

    /// Writes fresh embeddings for existing chunks, e.g. after a model change.
    pub async fn update_embeddings(&self, updates: &[(ChunkId, Vec<f16>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (id, vector) in updates {
            sqlx::query("UPDATE chunks SET embedding = ?1 WHERE id = ?2")
                .bind(bytemuck::cast_slice::<f16, u8>(vector))
                .bind(&id[..])
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Nulls out the embeddings for the given chunks, leaving their text in
    /// place for a later re-embed.
    pub async fn clear_embeddings(&self, ids: &[ChunkId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE chunks SET embedding = NULL WHERE id = ?1")
                .bind(&id[..])
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Records which model produced the stored embeddings.
    pub async fn set_model_tag(&self, tag: &ModelTag) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_meta (id, model_id, dimension, created_at, updated_at)
            VALUES (1, ?1, ?2, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                model_id = excluded.model_id,
                dimension = excluded.dimension,
                updated_at = datetime('now')
            "#,
        )
        .bind(&tag.model_id)
        .bind(tag.dimension as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn model_tag(&self) -> Result<Option<ModelTag>> {
        let row = sqlx::query("SELECT model_id, dimension FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let dimension: i64 = row.get("dimension");
            ModelTag {
                model_id: row.get("model_id"),
                dimension: dimension as usize,
            }
        }))
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let files = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let chunks = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            files: files as usize,
            chunks: chunks as usize,
            embedded_chunks: embedded as usize,
        })
    }

    /// Drops all files, chunks, and the model tag.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_stored_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChunk> {
    let id_bytes: Vec<u8> = row.get("id");
    let content_hash_bytes: Vec<u8> = row.get("content_hash");
    let language_name: String = row.get("language");
    let start_line: i64 = row.get("start_line");
    let end_line: i64 = row.get("end_line");
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding");

    let language = Language::from_name(&language_name).ok_or_else(|| {
        EngineError::corrupt(format!("unknown language '{language_name}' in chunks table"))
    })?;

    let embedding = match embedding_bytes {
        Some(bytes) => {
            if bytes.len() % 2 != 0 {
                return Err(EngineError::corrupt(format!(
                    "embedding blob has odd length {}",
                    bytes.len()
                )));
            }
            Some(bytemuck::cast_slice::<u8, f16>(&bytes).to_vec())
        }
        None => None,
    };

    Ok(StoredChunk {
        chunk: CodeChunk {
            id: blob_to_hash(&id_bytes, "chunks.id")?,
            source_path: row.get("source_path"),
            language,
            start_line: start_line as usize,
            end_line: end_line as usize,
            text: row.get("content"),
            content_hash: blob_to_hash(&content_hash_bytes, "chunks.content_hash")?,
        },
        embedding,
    })
}

fn blob_to_hash(bytes: &[u8], column: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| EngineError::corrupt(format!("{column} blob is {} bytes, want 32", bytes.len())))
}
