//! Error types for indexing, storage, and retrieval.

use thiserror::Error;

/// Errors surfaced by the retrieval engine.
///
/// Chunking degradation is deliberately absent: falling back to windowed
/// chunks is not a failure, so it travels in `FileReport`/`IndexReport`
/// instead of here.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Embedding a chunk failed after the batch fallback.
    #[error("embedding failed for {failed} of {total} chunks in '{path}'")]
    EmbeddingFailed {
        path: String,
        failed: usize,
        total: usize,
    },

    /// The persisted index could not be loaded as-is.
    #[error("persisted index is corrupt: {reason}")]
    IndexCorrupt { reason: String },

    /// The query text itself could not be embedded. Retrieval reports this
    /// through `RetrievalResult::query_embedding_failed`; callers that treat
    /// it as fatal raise this variant.
    #[error("failed to embed query text")]
    QueryEmbeddingFailed,

    /// A vector with the wrong dimensionality was handed to the index.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Embed(#[from] codelib_embed::EmbedError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        EngineError::IndexCorrupt {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
