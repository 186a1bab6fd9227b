//! Splitting source files into semantically bounded chunks for retrieval.
//!
//! This crate turns raw file content into [`CodeChunk`]s: contiguous,
//! line-aligned excerpts sized for an embedding model. Languages with a known
//! boundary grammar are split at top-level declarations; everything else
//! falls back to a sliding line window with overlap, so a file is always
//! indexed — degraded rather than dropped.
//!
//! Chunking is deterministic: identical content always produces identical
//! boundaries and chunk ids, which is what lets re-indexing an unchanged file
//! be a no-op at the index layer.

pub mod chunker;
pub mod language;

pub use chunker::{ChunkId, Chunker, ChunkerConfig, ChunkingOutcome, CodeChunk};
pub use language::{ChunkStrategy, Language};
