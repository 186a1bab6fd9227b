//! In-memory vector index with brute-force cosine search.
//!
//! The index holds every embedded chunk in a flat map and scores queries by
//! scanning all entries. For codebase-sized corpora this stays well under a
//! millisecond per query and avoids approximate-search dependencies entirely.
//! Durable state lives in [`ChunkStore`](super::chunk_store::ChunkStore); the
//! index is rebuilt from it on open.

use std::collections::HashMap;

use codelib_chunk::{ChunkId, CodeChunk};
use half::f16;

use crate::error::{EngineError, Result};

/// A chunk together with its embedding, as held by the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: CodeChunk,
    pub vector: Vec<f16>,
}

/// A search hit: the matching chunk and its similarity score in `[0, 1]`.
///
/// Scores are cosine similarity mapped through `(cos + 1) / 2`, so 1.0 is an
/// identical direction, 0.5 is orthogonal, and 0.0 is opposite.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: CodeChunk,
    pub score: f32,
}

/// Flat cosine-similarity index over embedded chunks.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    entries: HashMap<ChunkId, IndexEntry>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: HashMap::new(),
        }
    }

    /// Builds an index from pre-loaded entries, e.g. when restoring from storage.
    pub fn from_entries(dimension: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        let mut index = Self::new(dimension);
        for entry in entries {
            index.add(entry)?;
        }
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an entry. Vectors of the wrong width are rejected
    /// rather than silently skewing every later search.
    pub fn add(&mut self, entry: IndexEntry) -> Result<()> {
        if entry.vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        self.entries.insert(entry.chunk.id, entry);
        Ok(())
    }

    pub fn remove(&mut self, id: &ChunkId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Removes every chunk that came from `source_path`. Returns how many were dropped.
    pub fn remove_by_path(&mut self, source_path: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.chunk.source_path != source_path);
        before - self.entries.len()
    }

    /// Scores every entry against `query` and returns the top `limit` hits,
    /// best first. Ties are broken deterministically: shorter chunk first,
    /// then path, then start line.
    pub fn search(&self, query: &[f16], limit: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_f32: Vec<f32> = query.iter().map(|v| v.to_f32()).collect();
        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .map(|entry| SearchHit {
                chunk: entry.chunk.clone(),
                score: similarity_score(&query_f32, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let len_a = a.chunk.end_line - a.chunk.start_line;
                    let len_b = b.chunk.end_line - b.chunk.start_line;
                    len_a.cmp(&len_b)
                })
                .then_with(|| a.chunk.source_path.cmp(&b.chunk.source_path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Cosine similarity mapped into `[0, 1]` via `(cos + 1) / 2`.
///
/// A zero vector on either side scores 0.5 (treated as orthogonal).
fn similarity_score(query: &[f32], entry: &[f16]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_q = 0.0f32;
    let mut norm_e = 0.0f32;
    for (q, e) in query.iter().zip(entry.iter()) {
        let e = e.to_f32();
        dot += q * e;
        norm_q += q * q;
        norm_e += e * e;
    }
    if norm_q == 0.0 || norm_e == 0.0 {
        return 0.5;
    }
    let cos = dot / (norm_q.sqrt() * norm_e.sqrt());
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelib_chunk::Language;

    fn chunk(path: &str, start: usize, end: usize) -> CodeChunk {
        let text = format!("{path}:{start}-{end}");
        let content_hash = *blake3::hash(text.as_bytes()).as_bytes();
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(start as u64).to_le_bytes());
        hasher.update(&(end as u64).to_le_bytes());
        hasher.update(&content_hash);
        CodeChunk {
            id: *hasher.finalize().as_bytes(),
            source_path: path.to_string(),
            language: Language::Plain,
            start_line: start,
            end_line: end,
            text,
            content_hash,
        }
    }

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().map(|v| f16::from_f32(*v)).collect()
    }

    #[test]
    fn identical_vector_scores_one() {
        let mut index = VectorIndex::new(3);
        index
            .add(IndexEntry {
                chunk: chunk("a.rs", 1, 5),
                vector: vector(&[1.0, 0.0, 0.0]),
            })
            .unwrap();

        let hits = index.search(&vector(&[1.0, 0.0, 0.0]), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn opposite_vector_scores_near_zero() {
        let mut index = VectorIndex::new(3);
        index
            .add(IndexEntry {
                chunk: chunk("a.rs", 1, 5),
                vector: vector(&[1.0, 0.0, 0.0]),
            })
            .unwrap();

        let hits = index.search(&vector(&[-1.0, 0.0, 0.0]), 10).unwrap();
        assert!(hits[0].score < 0.01);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let mut index = VectorIndex::new(3);
        let result = index.add(IndexEntry {
            chunk: chunk("a.rs", 1, 5),
            vector: vector(&[1.0, 0.0]),
        });
        assert!(matches!(
            result,
            Err(EngineError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index.search(&vector(&[1.0]), 5).is_err());
    }

    #[test]
    fn remove_by_path_drops_only_that_file() {
        let mut index = VectorIndex::new(2);
        index
            .add(IndexEntry {
                chunk: chunk("a.rs", 1, 5),
                vector: vector(&[1.0, 0.0]),
            })
            .unwrap();
        index
            .add(IndexEntry {
                chunk: chunk("a.rs", 6, 10),
                vector: vector(&[0.0, 1.0]),
            })
            .unwrap();
        index
            .add(IndexEntry {
                chunk: chunk("b.rs", 1, 5),
                vector: vector(&[1.0, 1.0]),
            })
            .unwrap();

        assert_eq!(index.remove_by_path("a.rs"), 2);
        assert_eq!(index.len(), 1);
        let hits = index.search(&vector(&[1.0, 1.0]), 10).unwrap();
        assert_eq!(hits[0].chunk.source_path, "b.rs");
    }

    #[test]
    fn equal_scores_break_ties_deterministically() {
        let mut index = VectorIndex::new(2);
        // Same vector for all three, so ranking falls to the tie-break chain.
        for (path, start, end) in [("b.rs", 1, 20), ("a.rs", 1, 5), ("a.rs", 10, 14)] {
            index
                .add(IndexEntry {
                    chunk: chunk(path, start, end),
                    vector: vector(&[1.0, 0.0]),
                })
                .unwrap();
        }

        let hits = index.search(&vector(&[1.0, 0.0]), 10).unwrap();
        let order: Vec<_> = hits
            .iter()
            .map(|h| (h.chunk.source_path.as_str(), h.chunk.start_line))
            .collect();
        assert_eq!(order, vec![("a.rs", 1), ("a.rs", 10), ("b.rs", 1)]);
    }

    #[test]
    fn limit_truncates_results() {
        let mut index = VectorIndex::new(2);
        for i in 0..10 {
            index
                .add(IndexEntry {
                    chunk: chunk("a.rs", i * 10 + 1, i * 10 + 5),
                    vector: vector(&[1.0, i as f32 / 10.0]),
                })
                .unwrap();
        }
        assert_eq!(index.search(&vector(&[1.0, 0.0]), 3).unwrap().len(), 3);
        assert!(index.search(&vector(&[1.0, 0.0]), 0).unwrap().is_empty());
    }
}
