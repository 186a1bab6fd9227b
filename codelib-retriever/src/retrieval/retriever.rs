//! Query filtering, thresholding, and overlap dedupe.
//!
//! The vector index returns a raw score-ordered candidate list; this module
//! narrows it to what callers actually want: only chunks matching the query's
//! language and path filters, above the similarity floor, with near-duplicate
//! overlapping chunks from the same file collapsed to the best-scoring one.

use codelib_chunk::Language;

use super::vector_index::SearchHit;

/// A retrieval query. Everything except the text is optional; unset fields
/// fall back to the library defaults.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    pub top_k: Option<usize>,
    pub language: Option<Language>,
    pub path_prefix: Option<String>,
    pub threshold: Option<f32>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Tunables applied to every retrieval.
#[derive(Debug, Clone, Copy)]
pub struct RetrieverConfig {
    /// Minimum score for a hit to be returned, unless the query overrides it.
    pub similarity_threshold: f32,
    /// Hits to return when the query does not say.
    pub default_top_k: usize,
    /// Two same-file chunks whose line overlap exceeds this fraction of the
    /// shorter chunk are considered duplicates.
    pub overlap_dedupe_fraction: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.55,
            default_top_k: 5,
            overlap_dedupe_fraction: 0.5,
        }
    }
}

/// Narrows a score-ordered candidate list to the final hit set for `query`.
///
/// Candidates must already be sorted best-first, as
/// [`VectorIndex::search`](super::vector_index::VectorIndex::search) returns
/// them. Filtering runs before the top-k cut so a filtered query is not
/// starved by high-scoring chunks it would discard.
pub fn select_hits(
    candidates: Vec<SearchHit>,
    query: &Query,
    config: &RetrieverConfig,
) -> Vec<SearchHit> {
    let threshold = query.threshold.unwrap_or(config.similarity_threshold);
    let top_k = query.top_k.unwrap_or(config.default_top_k);

    let filtered = candidates.into_iter().filter(|hit| {
        if hit.score < threshold {
            return false;
        }
        if let Some(language) = query.language
            && hit.chunk.language != language
        {
            return false;
        }
        if let Some(prefix) = &query.path_prefix
            && !hit.chunk.source_path.starts_with(prefix.as_str())
        {
            return false;
        }
        true
    });

    let mut kept: Vec<SearchHit> = Vec::new();
    for hit in filtered {
        // Candidates arrive best-first, so the first of any overlapping pair
        // is the one to keep.
        let duplicate = kept.iter().any(|existing| {
            existing.chunk.source_path == hit.chunk.source_path
                && overlap_fraction(
                    (existing.chunk.start_line, existing.chunk.end_line),
                    (hit.chunk.start_line, hit.chunk.end_line),
                ) > config.overlap_dedupe_fraction
        });
        if !duplicate {
            kept.push(hit);
        }
        if kept.len() == top_k {
            break;
        }
    }
    kept
}

/// Line-range overlap as a fraction of the shorter range. Ranges are 1-based
/// inclusive.
fn overlap_fraction(a: (usize, usize), b: (usize, usize)) -> f32 {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    if start > end {
        return 0.0;
    }
    let overlap = end - start + 1;
    let shorter = (a.1 - a.0 + 1).min(b.1 - b.0 + 1);
    overlap as f32 / shorter as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use codelib_chunk::CodeChunk;

    fn hit(path: &str, language: Language, start: usize, end: usize, score: f32) -> SearchHit {
        let text = format!("{path}:{start}");
        SearchHit {
            chunk: CodeChunk {
                id: *blake3::hash(text.as_bytes()).as_bytes(),
                source_path: path.to_string(),
                language,
                start_line: start,
                end_line: end,
                text,
                content_hash: [0; 32],
            },
            score,
        }
    }

    #[test]
    fn threshold_drops_weak_hits() {
        let candidates = vec![
            hit("a.rs", Language::Rust, 1, 5, 0.9),
            hit("b.rs", Language::Rust, 1, 5, 0.4),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query"),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.source_path, "a.rs");
    }

    #[test]
    fn query_threshold_overrides_default() {
        let candidates = vec![hit("a.rs", Language::Rust, 1, 5, 0.4)];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_threshold(0.3),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn language_filter_applies_before_top_k() {
        let mut candidates = vec![hit("keep.py", Language::Python, 1, 5, 0.6)];
        for i in 0..5 {
            candidates.insert(i, hit("noise.rs", Language::Rust, i * 10 + 1, i * 10 + 5, 0.9));
        }
        let kept = select_hits(
            candidates,
            &Query::new("query").with_language(Language::Python).with_top_k(3),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.source_path, "keep.py");
    }

    #[test]
    fn path_prefix_filter() {
        let candidates = vec![
            hit("src/core/a.rs", Language::Rust, 1, 5, 0.9),
            hit("tests/b.rs", Language::Rust, 1, 5, 0.8),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_path_prefix("src/"),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.source_path, "src/core/a.rs");
    }

    #[test]
    fn heavy_overlap_keeps_best_scoring_chunk() {
        // 1..=10 and 4..=10 overlap 7 lines of the shorter's 7 lines.
        let candidates = vec![
            hit("a.rs", Language::Rust, 1, 10, 0.9),
            hit("a.rs", Language::Rust, 4, 10, 0.8),
            hit("a.rs", Language::Rust, 50, 60, 0.7),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_top_k(5),
            &RetrieverConfig::default(),
        );
        let ranges: Vec<_> = kept
            .iter()
            .map(|h| (h.chunk.start_line, h.chunk.end_line))
            .collect();
        assert_eq!(ranges, vec![(1, 10), (50, 60)]);
    }

    #[test]
    fn light_overlap_survives_dedupe() {
        // 1..=10 and 9..=20 share 2 lines of the shorter's 10, below the cutoff.
        let candidates = vec![
            hit("a.rs", Language::Rust, 1, 10, 0.9),
            hit("a.rs", Language::Rust, 9, 20, 0.8),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_top_k(5),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn same_ranges_in_different_files_are_distinct() {
        let candidates = vec![
            hit("a.rs", Language::Rust, 1, 10, 0.9),
            hit("b.rs", Language::Rust, 1, 10, 0.8),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_top_k(5),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn top_k_truncates_after_dedupe() {
        let candidates = vec![
            hit("a.rs", Language::Rust, 1, 5, 0.9),
            hit("b.rs", Language::Rust, 1, 5, 0.85),
            hit("c.rs", Language::Rust, 1, 5, 0.8),
        ];
        let kept = select_hits(
            candidates,
            &Query::new("query").with_top_k(2),
            &RetrieverConfig::default(),
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].chunk.source_path, "b.rs");
    }

    #[test]
    fn overlap_fraction_edges() {
        assert_eq!(overlap_fraction((1, 10), (11, 20)), 0.0);
        assert_eq!(overlap_fraction((1, 10), (1, 10)), 1.0);
        assert!((overlap_fraction((1, 10), (6, 25)) - 0.5).abs() < 1e-6);
    }
}
