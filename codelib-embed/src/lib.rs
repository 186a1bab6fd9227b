//! Embedding generation for the codelib retrieval engine.
//!
//! This crate maps chunk text (and query text) to fixed-dimension vectors.
//! The embedding model is a pretrained black box behind the
//! [`EmbeddingProvider`] trait:
//!
//! - [`FastEmbedProvider`] runs the same all-MiniLM-L6-v2 sentence
//!   transformer the hosted app uses, through fastembed's ONNX runtime.
//! - [`HashEmbedder`] is a deterministic token-bucket stand-in for tests and
//!   offline runs — no model files, stable vectors, plausible similarity.
//! - [`CachedEmbedder`] wraps any provider with a content-hash keyed cache
//!   ([`MemoryCacheStore`] or [`DiskCacheStore`]) so identical text is
//!   embedded once per model.
//!
//! Vectors are stored as `half::f16` and normalized to unit length by
//! default, so cosine similarity downstream is a plain dot product.
//!
//! ## Usage
//!
//! ```
//! use codelib_embed::{CachedEmbedder, EmbeddingProvider, HashEmbedder, MemoryCacheStore};
//!
//! # tokio_test::block_on(async {
//! let embedder = CachedEmbedder::new(
//!     HashEmbedder::default(),
//!     Box::new(MemoryCacheStore::default()),
//! );
//! let vector = embedder.embed_text("fn main() {}").await.unwrap();
//! assert_eq!(vector.len(), embedder.embedding_dimension());
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod provider;

pub use cache::{CacheStore, CachedEmbedder, DiskCacheStore, MemoryCacheStore};
pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, HashEmbedder};
