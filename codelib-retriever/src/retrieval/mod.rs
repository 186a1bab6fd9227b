//! Retrieval pipeline: storage, vector search, ranking, and prompt packing.

pub mod augmenter;
pub mod chunk_store;
pub mod library;
pub mod retriever;
pub mod vector_index;

pub use augmenter::{AugmenterConfig, PackedContext, augment_prompt, pack_context};
pub use chunk_store::{ChunkStore, FileRecord, ModelTag, StoreStats, StoredChunk, StoredFile};
pub use library::{
    FileReport, IndexReport, Library, LibraryConfig, LibraryStats, RetrievalResult,
};
pub use retriever::{Query, RetrieverConfig, select_hits};
pub use vector_index::{IndexEntry, SearchHit, VectorIndex};
