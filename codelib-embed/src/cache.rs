//! Content-hash keyed embedding cache.
//!
//! Identical chunk text — across files or across re-indexing passes — is
//! embedded once. Keys combine the provider's model id with a blake3 of the
//! text, so switching models never serves vectors from another model.
//!
//! The backing store is injectable: [`MemoryCacheStore`] for tests and
//! [`DiskCacheStore`] for persistence across runs.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use half::f16;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backing storage for cached embedding vectors.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<f16>>>;
    fn put(&self, key: &str, vector: Vec<f16>) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<f16>>>,
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<f16>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| EmbedError::invalid_config("Cache mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, vector: Vec<f16>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EmbedError::invalid_config("Cache mutex poisoned"))?;
        entries.insert(key.to_string(), vector);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// JSON-file backed cache store, write-through on every put.
///
/// Vectors are stored as f32 for readability; precision already bottoms out
/// at f16 so the round-trip is lossless.
#[derive(Debug)]
pub struct DiskCacheStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<f16>>>,
}

impl DiskCacheStore {
    /// Open a disk cache, loading existing entries if the file is present.
    /// An unreadable cache file is an error; a missing one starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let parsed: HashMap<String, Vec<f32>> =
                serde_json::from_str(&raw).map_err(|_| EmbedError::CacheFile {
                    path: path.clone(),
                })?;
            parsed
                .into_iter()
                .map(|(key, vector)| {
                    (key, vector.into_iter().map(f16::from_f32).collect())
                })
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, Vec<f16>>) -> Result<()> {
        let serializable: HashMap<&String, Vec<f32>> = entries
            .iter()
            .map(|(key, vector)| (key, vector.iter().map(|x| f32::from(*x)).collect()))
            .collect();
        let json = serde_json::to_string(&serializable)
            .map_err(|e| EmbedError::External { source: e.into() })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl CacheStore for DiskCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<f16>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| EmbedError::invalid_config("Cache mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, vector: Vec<f16>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EmbedError::invalid_config("Cache mutex poisoned"))?;
        entries.insert(key.to_string(), vector);
        self.flush(&entries)
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Provider wrapper that consults a [`CacheStore`] before the inner model.
///
/// Batch calls only send cache misses to the inner provider and stitch the
/// results back into input order.
pub struct CachedEmbedder<P: EmbeddingProvider> {
    inner: P,
    store: Box<dyn CacheStore>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {
    pub fn new(inner: P, store: Box<dyn CacheStore>) -> Self {
        Self {
            inner,
            store,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn cache_key(&self, text: &str) -> String {
        let content_hash = blake3::hash(text.as_bytes());
        format!("{}:{}", self.inner.model_id(), content_hash.to_hex())
    }

    pub fn cache_hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let key = self.cache_key(text);
        if let Some(vector) = self.store.get(&key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.inner.embed_text(text).await?;
        self.store.put(&key, vector.clone())?;
        Ok(vector)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut resolved: Vec<Option<Vec<f16>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (idx, text) in texts.iter().enumerate() {
            match self.store.get(&self.cache_key(text))? {
                Some(vector) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    resolved.push(Some(vector));
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    resolved.push(None);
                    miss_indices.push(idx);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_texts(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(EmbedError::invalid_config(
                    "Provider returned wrong number of embeddings for batch",
                ));
            }
            for (idx, vector) in miss_indices.into_iter().zip(fresh.embeddings) {
                self.store.put(&self.cache_key(&texts[idx]), vector.clone())?;
                resolved[idx] = Some(vector);
            }
        }

        let embeddings = resolved
            .into_iter()
            .map(|vector| {
                vector.ok_or_else(|| EmbedError::invalid_config("Unresolved batch entry"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashEmbedder;

    #[tokio::test]
    async fn cache_serves_repeat_texts_without_reembedding() {
        let embedder = CachedEmbedder::new(
            HashEmbedder::default(),
            Box::new(MemoryCacheStore::default()),
        );

        let first = embedder.embed_text("fn main() {}").await.unwrap();
        let second = embedder.embed_text("fn main() {}").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(embedder.cache_misses(), 1);
        assert_eq!(embedder.cache_hits(), 1);
    }

    #[tokio::test]
    async fn batch_mixes_hits_and_misses_in_order() {
        let embedder = CachedEmbedder::new(
            HashEmbedder::default(),
            Box::new(MemoryCacheStore::default()),
        );

        let warm = embedder.embed_text("alpha beta").await.unwrap();

        let texts = vec![
            "gamma delta".to_string(),
            "alpha beta".to_string(),
            "epsilon".to_string(),
        ];
        let result = embedder.embed_texts(&texts).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.embeddings[1], warm);
        // One hit for the warmed text, misses for the other two.
        assert_eq!(embedder.cache_hits(), 1);
        assert_eq!(embedder.cache_misses(), 3);

        // Batch output matches per-item calls for every entry.
        for (text, vector) in texts.iter().zip(&result.embeddings) {
            let single = HashEmbedder::default().embed_text(text).await.unwrap();
            assert_eq!(&single, vector);
        }
    }

    #[tokio::test]
    async fn disk_store_round_trips_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("embeddings.json");

        let vector = {
            let embedder = CachedEmbedder::new(
                HashEmbedder::default(),
                Box::new(DiskCacheStore::open(&cache_path).unwrap()),
            );
            embedder.embed_text("persist me").await.unwrap()
        };

        let reopened = CachedEmbedder::new(
            HashEmbedder::default(),
            Box::new(DiskCacheStore::open(&cache_path).unwrap()),
        );
        let cached = reopened.embed_text("persist me").await.unwrap();

        assert_eq!(vector, cached);
        assert_eq!(reopened.cache_hits(), 1);
        assert_eq!(reopened.cache_misses(), 0);
    }

    #[tokio::test]
    async fn different_models_never_share_cache_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("embeddings.json");

        let small = CachedEmbedder::new(
            HashEmbedder::new(64),
            Box::new(DiskCacheStore::open(&cache_path).unwrap()),
        );
        small.embed_text("shared text").await.unwrap();
        assert_eq!(small.cache_misses(), 1);

        // Same text, same cache file, different model id: must miss.
        let other = CachedEmbedder::new(
            HashEmbedder::new(128),
            Box::new(DiskCacheStore::open(&cache_path).unwrap()),
        );
        let vector = other.embed_text("shared text").await.unwrap();
        assert_eq!(vector.len(), 128);
        assert_eq!(other.cache_hits(), 0);
        assert_eq!(other.cache_misses(), 1);
    }
}
