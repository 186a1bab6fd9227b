//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order.
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector.
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Build a result from f16 embeddings; the dimension is inferred from the
    /// first vector (0 when empty).
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// For a fixed model identity, embedding is treated as pure: the same input
/// text always yields the same vector. Batch embedding must be
/// order-preserving and equivalent to per-item calls.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing).
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimension of the vectors this provider produces.
    fn embedding_dimension(&self) -> usize;

    /// Stable identity of the model configuration, used to detect staleness
    /// of persisted vectors.
    fn model_id(&self) -> String;
}

/// FastEmbed-based embedding provider using real ONNX models.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Create an uninitialized provider; call [`initialize`](Self::initialize)
    /// before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 384, // all-MiniLM-L6-v2
        }
    }

    /// Load the embedding model. Inference runs on a blocking thread, so the
    /// load does too.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!("Loading embedding model: {}", self.config.model_name);

        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let init_options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                    .with_show_download_progress(false);

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Probe the dimension with a test embedding.
                let test_embeddings = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = test_embeddings.first().map(|emb| emb.len()).unwrap_or(384);

                Ok((model, dimension))
            })
            .await??;

        tracing::info!("Model loaded successfully. Dimension: {}", dimension);
        self.model = Some(Arc::new(Mutex::new(model)));
        self.dimension = dimension;
        Ok(())
    }

    /// Create and initialize a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Convert f32 embeddings to f16, normalizing when configured.
    fn convert_to_f16(&self, embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
        embeddings
            .into_iter()
            .map(|embedding| {
                if self.config.normalize {
                    normalize_to_f16(embedding)
                } else {
                    embedding.into_iter().map(f16::from_f32).collect()
                }
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model_clone
                    .lock()
                    .map_err(|_| EmbedError::invalid_config("Embedding model mutex poisoned"))?;
                model_guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(self.convert_to_f16(batch_embeddings));
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("fastembed:{}:{}", self.config.model_name, self.dimension)
    }
}

/// Deterministic token-bucket embedder for tests and offline use.
///
/// Each token is FNV-hashed into a signed bucket; the accumulated vector is
/// normalized. Shared vocabulary between two texts raises their cosine
/// similarity, which is enough for ranking assertions without a model file.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f16> {
        let mut accumulator = vec![0f32; self.dimension];
        for token in tokenize(text) {
            let mut hasher = FnvHasher::default();
            hasher.write(token.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            accumulator[bucket] += sign;
        }
        normalize_to_f16(accumulator)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|text| self.embed_sync(text)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("hash:fnv1a:{}", self.dimension)
    }
}

/// Lowercased word tokens with a light suffix strip so close inflections
/// ("sort", "sorts", "sorted") land in the same bucket.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let token = token.to_lowercase();
            for suffix in ["ing", "ed", "es", "s"] {
                if token.len() > suffix.len() + 2 {
                    if let Some(stem) = token.strip_suffix(suffix) {
                        return stem.to_string();
                    }
                }
            }
            token
        })
        .collect()
}

fn normalize_to_f16(embedding: Vec<f32>) -> Vec<f16> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding
            .into_iter()
            .map(|x| f16::from_f32(x / norm))
            .collect()
    } else {
        embedding.into_iter().map(f16::from_f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f16], b: &[f16]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| f32::from(*x) * f32::from(*y))
            .sum()
    }

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let config = EmbedConfig::default();
        let provider = FastEmbedProvider::new(config);

        assert_eq!(provider.embedding_dimension(), 384);
        assert!(provider.model_id().starts_with("fastembed:all-MiniLM-L6-v2"));
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed_text("fn parse(input: &str)").await.unwrap();
        let b = embedder.embed_text("fn parse(input: &str)").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
    }

    #[tokio::test]
    async fn hash_embedder_vectors_are_unit_norm() {
        let embedder = HashEmbedder::default();
        let vector = embedder.embed_text("sort the numbers").await.unwrap();
        let norm: f32 = vector.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn hash_embedder_batch_matches_single_calls() {
        let embedder = HashEmbedder::default();
        let texts = vec![
            "def sort_numbers(values)".to_string(),
            "def format_report(rows)".to_string(),
        ];
        let batch = embedder.embed_texts(&texts).await.unwrap();
        for (text, expected) in texts.iter().zip(&batch.embeddings) {
            let single = embedder.embed_text(text).await.unwrap();
            assert_eq!(&single, expected);
        }
    }

    #[tokio::test]
    async fn related_texts_score_higher_than_unrelated() {
        let embedder = HashEmbedder::default();
        let sorting = embedder
            .embed_text("def sort_numbers(values): return sorted(values)")
            .await
            .unwrap();
        let query = embedder
            .embed_text("function that sorts a list of numbers")
            .await
            .unwrap();
        let unrelated = embedder
            .embed_text("class HttpClient: connect to the remote server")
            .await
            .unwrap();

        assert!(cosine(&query, &sorting) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::default();
        let vector = embedder.embed_text("").await.unwrap();
        assert!(vector.iter().all(|x| f32::from(*x) == 0.0));
    }
}
