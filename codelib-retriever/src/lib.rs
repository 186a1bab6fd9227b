//! Semantic code retrieval over a local library of source files.
//!
//! Files are split into chunks ([`codelib_chunk`]), embedded
//! ([`codelib_embed`]), and stored in SQLite alongside an in-memory cosine
//! index. Queries come back as ranked, deduplicated chunks, ready to be
//! packed into a generation prompt.
//!
//! The entry point is [`Library`](retrieval::Library):
//!
//! ```no_run
//! use std::sync::Arc;
//! use codelib_embed::HashEmbedder;
//! use codelib_retriever::retrieval::{Library, LibraryConfig, Query};
//!
//! # async fn example() -> codelib_retriever::Result<()> {
//! let embedder = Arc::new(HashEmbedder::default());
//! let library = Library::open_in_memory(embedder, LibraryConfig::new()).await?;
//!
//! library
//!     .index_file("src/sort.py", "def sort_numbers(items):\n    return sorted(items)\n", None)
//!     .await?;
//!
//! let result = library.retrieve(&Query::new("sort a list").with_top_k(3)).await?;
//! for hit in &result.hits {
//!     println!("{} {:.3}", hit.chunk.source_path, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod retrieval;

pub use error::{EngineError, Result};
