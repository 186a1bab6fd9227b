//! The `Library` orchestrator: chunking, embedding, storage, and search
//! behind one handle.
//!
//! A `Library` owns the SQLite store, the in-memory vector index, and a
//! shared embedding provider. Opening a library reconciles the persisted
//! state with the configured model: a matching model tag loads straight into
//! the index, a mismatched tag re-embeds the stored chunk text, and a corrupt
//! store is rebuilt from the retained file content.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use codelib_chunk::{Chunker, ChunkerConfig, Language};
use codelib_embed::EmbeddingProvider;
use half::f16;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

use super::augmenter::{AugmenterConfig, augment_prompt};
use super::chunk_store::{ChunkStore, ModelTag, StoreStats, StoredChunk, StoredFile};
use super::retriever::{Query, RetrieverConfig, select_hits};
use super::vector_index::{IndexEntry, VectorIndex};

/// Candidates requested from the index per hit ultimately wanted, so that
/// filtering and dedupe have room to work.
const CANDIDATE_INFLATION: usize = 3;

/// Configuration for a [`Library`].
#[derive(Debug, Clone, Default)]
pub struct LibraryConfig {
    pub chunker: ChunkerConfig,
    pub retriever: RetrieverConfig,
    pub augmenter: AugmenterConfig,
}

impl LibraryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.retriever.default_top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.retriever.similarity_threshold = threshold;
        self
    }

    pub fn with_overlap_dedupe_fraction(mut self, fraction: f32) -> Self {
        self.retriever.overlap_dedupe_fraction = fraction;
        self
    }

    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.augmenter.max_context_chars = chars;
        self
    }
}

/// What happened while indexing one file.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub source_path: String,
    /// File content matched the stored hash, so nothing was redone.
    pub unchanged: bool,
    pub chunks_added: usize,
    pub embeddings_generated: usize,
    pub embed_failures: usize,
    /// Structural chunking found no boundaries and fell back to windows.
    pub degraded: bool,
}

/// Aggregate outcome of a batch indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub chunks_added: usize,
    pub embed_failures: usize,
    pub degraded_files: Vec<String>,
    /// Set when the cancel flag stopped the run between files.
    pub cancelled: bool,
}

impl IndexReport {
    fn absorb(&mut self, report: &FileReport) {
        if report.unchanged {
            self.files_unchanged += 1;
            return;
        }
        self.files_indexed += 1;
        self.chunks_added += report.chunks_added;
        self.embed_failures += report.embed_failures;
        if report.degraded {
            self.degraded_files.push(report.source_path.clone());
        }
    }
}

/// Retrieval outcome: the final hit set plus how many index entries were
/// scored to produce it. An unembeddable query yields an empty result with
/// `query_embedding_failed` set instead of an error, so a flaky model never
/// takes down a caller that can live without context.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<super::vector_index::SearchHit>,
    pub candidates_scored: usize,
    pub query_embedding_failed: bool,
}

/// A snapshot of the library for status reporting.
#[derive(Debug, Clone)]
pub struct LibraryStats {
    pub store: StoreStats,
    pub index_entries: usize,
    pub model_id: String,
    pub dimension: usize,
}

/// Indexed, searchable collection of source files.
pub struct Library {
    config: LibraryConfig,
    chunker: Chunker,
    store: ChunkStore,
    embedder: Arc<dyn EmbeddingProvider>,
    index: RwLock<VectorIndex>,
}

impl Library {
    /// Opens (or creates) a library rooted at `base`, storing its database as
    /// `.codelib.db` inside it.
    pub async fn open(
        base: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        config: LibraryConfig,
    ) -> Result<Self> {
        let store = ChunkStore::open(base).await?;
        Self::open_with_store(store, embedder, config).await
    }

    /// Opens a library over in-memory storage. Nothing survives drop; used in
    /// tests and throwaway sessions.
    pub async fn open_in_memory(
        embedder: Arc<dyn EmbeddingProvider>,
        config: LibraryConfig,
    ) -> Result<Self> {
        let store = ChunkStore::open_memory().await?;
        Self::open_with_store(store, embedder, config).await
    }

    async fn open_with_store(
        store: ChunkStore,
        embedder: Arc<dyn EmbeddingProvider>,
        config: LibraryConfig,
    ) -> Result<Self> {
        let dimension = embedder.embedding_dimension();
        let model_id = embedder.model_id();

        let chunker = Chunker::new(config.chunker.clone());
        let library = Self {
            config,
            chunker,
            store,
            embedder,
            index: RwLock::new(VectorIndex::new(dimension)),
        };

        match library.store.model_tag().await? {
            None => {
                library
                    .store
                    .set_model_tag(&ModelTag {
                        model_id,
                        dimension,
                    })
                    .await?;
                // A store missing its tag may still hold chunks (the tag row
                // can be lost independently); load whatever is there.
                if let Err(err) = library.load_index().await {
                    warn!("stored index unusable ({err}), rebuilding from retained content");
                    library.rebuild().await?;
                }
            }
            Some(tag) if tag.model_id == model_id && tag.dimension == dimension => {
                if let Err(err) = library.load_index().await {
                    warn!("stored index unusable ({err}), rebuilding from retained content");
                    library.rebuild().await?;
                }
            }
            Some(tag) => {
                info!(
                    old = %tag.model_id,
                    new = %model_id,
                    "embedding model changed, re-embedding stored chunks"
                );
                library.re_embed_all().await?;
                library
                    .store
                    .set_model_tag(&ModelTag {
                        model_id,
                        dimension,
                    })
                    .await?;
            }
        }

        Ok(library)
    }

    /// Loads every embedded chunk from storage into the vector index.
    async fn load_index(&self) -> Result<()> {
        let stored = self.store.load_all_chunks().await?;
        let dimension = self.embedder.embedding_dimension();

        let mut entries = Vec::new();
        for item in stored {
            if let Some(vector) = item.embedding {
                if vector.len() != dimension {
                    return Err(EngineError::corrupt(format!(
                        "stored embedding for '{}' has dimension {}, index wants {dimension}",
                        item.chunk.source_path,
                        vector.len()
                    )));
                }
                entries.push(IndexEntry {
                    chunk: item.chunk,
                    vector,
                });
            }
        }

        let loaded = entries.len();
        *self.index.write().await = VectorIndex::from_entries(dimension, entries)?;
        debug!(chunks = loaded, "index loaded from storage");
        Ok(())
    }

    /// Re-embeds every stored chunk's text with the current model and reloads
    /// the index. Chunks whose embedding fails stay stored without a vector.
    async fn re_embed_all(&self) -> Result<()> {
        let stored = self.store.load_all_chunks().await?;
        let texts: Vec<String> = stored.iter().map(|s| s.chunk.text.clone()).collect();
        if texts.is_empty() {
            *self.index.write().await = VectorIndex::new(self.embedder.embedding_dimension());
            return Ok(());
        }

        let (vectors, failures) = self.embed_with_fallback(&texts).await?;
        let mut updates = Vec::new();
        let mut failed_ids = Vec::new();
        for (item, vector) in stored.iter().zip(vectors.iter()) {
            match vector {
                Some(v) => updates.push((item.chunk.id, v.clone())),
                None => failed_ids.push(item.chunk.id),
            }
        }
        self.store.update_embeddings(&updates).await?;
        // Stale vectors from the old model must not linger: they may not even
        // have the right dimensionality anymore.
        self.store.clear_embeddings(&failed_ids).await?;
        if failures > 0 {
            warn!(failures, total = texts.len(), "some chunks failed to re-embed");
        }
        self.load_index().await
    }

    /// Embeds a batch, falling back to one-at-a-time on batch failure so a
    /// single poisoned text cannot sink the whole file. Returns per-text
    /// vectors (`None` where embedding failed) and the failure count.
    async fn embed_with_fallback(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Option<Vec<f16>>>, usize)> {
        match self.embedder.embed_texts(texts).await {
            Ok(result) => Ok((result.embeddings.into_iter().map(Some).collect(), 0)),
            Err(batch_err) => {
                warn!("batch embedding failed ({batch_err}), retrying per chunk");
                let mut vectors = Vec::with_capacity(texts.len());
                let mut failures = 0;
                for text in texts {
                    match self.embedder.embed_text(text).await {
                        Ok(vector) => vectors.push(Some(vector)),
                        Err(err) => {
                            debug!("chunk embedding failed: {err}");
                            failures += 1;
                            vectors.push(None);
                        }
                    }
                }
                if failures == texts.len() {
                    return Err(EngineError::EmbeddingFailed {
                        path: String::new(),
                        failed: failures,
                        total: texts.len(),
                    });
                }
                Ok((vectors, failures))
            }
        }
    }

    /// Chunks, embeds, and stores one file, replacing whatever was indexed
    /// for that path before. Passing identical content is a no-op.
    pub async fn index_file(
        &self,
        source_path: &str,
        content: &str,
        language_hint: Option<Language>,
    ) -> Result<FileReport> {
        let hash = *blake3::hash(content.as_bytes()).as_bytes();
        if self.store.file_hash(source_path).await? == Some(hash) {
            debug!(path = source_path, "content unchanged, skipping");
            return Ok(FileReport {
                source_path: source_path.to_string(),
                unchanged: true,
                ..FileReport::default()
            });
        }

        let outcome = self.chunker.chunk(source_path, content, language_hint);
        if outcome.degraded {
            warn!(path = source_path, "no structural boundaries found, using windowed chunks");
        }

        if outcome.chunks.is_empty() {
            // Empty file: record it so re-indexing stays cheap, index nothing.
            self.store
                .replace_path(
                    &StoredFile {
                        source_path: source_path.to_string(),
                        hash,
                        content: content.to_string(),
                    },
                    &[],
                )
                .await?;
            self.index.write().await.remove_by_path(source_path);
            return Ok(FileReport {
                source_path: source_path.to_string(),
                degraded: outcome.degraded,
                ..FileReport::default()
            });
        }

        let texts: Vec<String> = outcome.chunks.iter().map(|c| c.text.clone()).collect();
        let (vectors, failures) = match self.embed_with_fallback(&texts).await {
            Ok(ok) => ok,
            Err(EngineError::EmbeddingFailed { failed, total, .. }) => {
                return Err(EngineError::EmbeddingFailed {
                    path: source_path.to_string(),
                    failed,
                    total,
                });
            }
            Err(err) => return Err(err),
        };

        let stored: Vec<StoredChunk> = outcome
            .chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| StoredChunk {
                chunk: chunk.clone(),
                embedding: vector.clone(),
            })
            .collect();

        self.store
            .replace_path(
                &StoredFile {
                    source_path: source_path.to_string(),
                    hash,
                    content: content.to_string(),
                },
                &stored,
            )
            .await?;

        {
            let mut index = self.index.write().await;
            index.remove_by_path(source_path);
            for item in &stored {
                if let Some(vector) = &item.embedding {
                    index.add(IndexEntry {
                        chunk: item.chunk.clone(),
                        vector: vector.clone(),
                    })?;
                }
            }
        }

        let embedded = stored.iter().filter(|s| s.embedding.is_some()).count();
        debug!(path = source_path, chunks = stored.len(), embedded, "file indexed");
        Ok(FileReport {
            source_path: source_path.to_string(),
            unchanged: false,
            chunks_added: stored.len(),
            embeddings_generated: embedded,
            embed_failures: failures,
            degraded: outcome.degraded,
        })
    }

    /// Indexes a batch of `(path, content)` pairs, checking `cancel` between
    /// files. A cancelled run leaves already-indexed files fully indexed.
    pub async fn index_files(
        &self,
        files: &[(String, String)],
        cancel: &AtomicBool,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        for (path, content) in files {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                info!(
                    indexed = report.files_indexed,
                    remaining = files.len() - report.files_indexed - report.files_unchanged,
                    "indexing cancelled"
                );
                break;
            }
            let file_report = self.index_file(path, content, None).await?;
            report.absorb(&file_report);
        }
        Ok(report)
    }

    /// Removes a file from the index and storage. Returns how many chunks
    /// were dropped.
    pub async fn remove_path(&self, source_path: &str) -> Result<usize> {
        let removed = self.store.delete_path(source_path).await?;
        self.index.write().await.remove_by_path(source_path);
        debug!(path = source_path, chunks = removed, "file removed");
        Ok(removed)
    }

    /// Embeds the query and returns the filtered, deduped hit set.
    pub async fn retrieve(&self, query: &Query) -> Result<RetrievalResult> {
        let query_vector = match self.embedder.embed_text(&query.text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("query embedding failed: {err}");
                return Ok(RetrievalResult {
                    query_embedding_failed: true,
                    ..RetrievalResult::default()
                });
            }
        };

        let index = self.index.read().await;
        let candidates_scored = index.len();
        let top_k = query.top_k.unwrap_or(self.config.retriever.default_top_k);
        let candidates = index.search(&query_vector, top_k * CANDIDATE_INFLATION)?;
        drop(index);

        let hits = select_hits(candidates, query, &self.config.retriever);
        debug!(
            query = %query.text,
            hits = hits.len(),
            candidates_scored,
            "retrieval complete"
        );
        Ok(RetrievalResult {
            hits,
            candidates_scored,
            query_embedding_failed: false,
        })
    }

    /// Retrieves context for `request` and packs it into an augmented prompt.
    /// If the request cannot be embedded the bare request comes back
    /// unchanged rather than failing the caller's generation flow.
    pub async fn augment_request(&self, request: &str) -> Result<String> {
        let result = self.retrieve(&Query::new(request)).await?;
        Ok(augment_prompt(request, &result.hits, &self.config.augmenter))
    }

    /// Re-chunks and re-embeds everything from the retained file content,
    /// discarding whatever chunk rows were there before.
    pub async fn rebuild(&self) -> Result<()> {
        let files = self.store.load_file_contents().await?;
        info!(files = files.len(), "rebuilding index from retained content");

        *self.index.write().await = VectorIndex::new(self.embedder.embedding_dimension());
        for file in files {
            // Force a full re-index by bypassing the unchanged-hash check.
            let outcome = self.chunker.chunk(&file.source_path, &file.content, None);
            let texts: Vec<String> = outcome.chunks.iter().map(|c| c.text.clone()).collect();
            let (vectors, _failures) = if texts.is_empty() {
                (Vec::new(), 0)
            } else {
                self.embed_with_fallback(&texts).await?
            };
            let stored: Vec<StoredChunk> = outcome
                .chunks
                .iter()
                .zip(vectors.iter())
                .map(|(chunk, vector)| StoredChunk {
                    chunk: chunk.clone(),
                    embedding: vector.clone(),
                })
                .collect();
            self.store.replace_path(&file, &stored).await?;

            let mut index = self.index.write().await;
            for item in &stored {
                if let Some(vector) = &item.embedding {
                    index.add(IndexEntry {
                        chunk: item.chunk.clone(),
                        vector: vector.clone(),
                    })?;
                }
            }
        }
        self.store
            .set_model_tag(&ModelTag {
                model_id: self.embedder.model_id(),
                dimension: self.embedder.embedding_dimension(),
            })
            .await?;
        Ok(())
    }

    /// Drops everything: storage and the in-memory index. The model tag is
    /// written back immediately so files indexed after the clear stay
    /// loadable on the next open.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.store
            .set_model_tag(&ModelTag {
                model_id: self.embedder.model_id(),
                dimension: self.embedder.embedding_dimension(),
            })
            .await?;
        *self.index.write().await = VectorIndex::new(self.embedder.embedding_dimension());
        info!("library cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        Ok(LibraryStats {
            store: self.store.stats().await?,
            index_entries: self.index.read().await.len(),
            model_id: self.embedder.model_id(),
            dimension: self.embedder.embedding_dimension(),
        })
    }

    /// Indexed file metadata, for status displays.
    pub async fn list_files(&self) -> Result<Vec<super::chunk_store::FileRecord>> {
        self.store.list_files().await
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }
}
