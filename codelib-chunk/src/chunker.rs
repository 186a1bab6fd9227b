//! Line-aligned chunking of source files.
//!
//! The [`Chunker`] splits file content into [`CodeChunk`]s using the strategy
//! selected for the file's language:
//!
//! - **Structural**: chunk boundaries sit at top-level declaration starts
//!   (function, class, impl, ...), so a declaration body is never split
//!   across two chunks. Decorators, attributes, and doc comments stay
//!   attached to the item below them.
//! - **Windowed**: a sliding window of whole lines with configurable overlap,
//!   used for languages without a grammar and as the fallback when the
//!   structural pass finds nothing to anchor on.
//!
//! After boundary detection, chunks below a minimum line count are merged
//! into the following chunk (the final fragment merges backward), and chunks
//! above a maximum line count are re-split with the window strategy.

use crate::language::{ChunkStrategy, Language, attachment_patterns, boundary_patterns};
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::Path;

/// Stable chunk identifier: blake3 over source path, line range, and content
/// hash. Re-chunking unchanged content yields the same id.
pub type ChunkId = [u8; 32];

/// An immutable unit of indexed content.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub id: ChunkId,
    /// Path of the source file within the library, as uploaded.
    pub source_path: String,
    pub language: Language,
    /// First line of the chunk, 1-based inclusive.
    pub start_line: usize,
    /// Last line of the chunk, 1-based inclusive.
    pub end_line: usize,
    pub text: String,
    /// blake3 of `text`, used for embedding-cache lookups and change
    /// detection.
    pub content_hash: [u8; 32],
}

impl CodeChunk {
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    pub fn content_hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }

    /// Number of lines covered by this chunk.
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

impl Serialize for CodeChunk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("CodeChunk", 7)?;
        state.serialize_field("id", &self.id_hex())?;
        state.serialize_field("source_path", &self.source_path)?;
        state.serialize_field("language", &self.language)?;
        state.serialize_field("start_line", &self.start_line)?;
        state.serialize_field("end_line", &self.end_line)?;
        state.serialize_field("text", &self.text)?;
        state.serialize_field("content_hash", &self.content_hash_hex())?;
        state.end()
    }
}

/// Result of chunking one file.
#[derive(Debug, Clone)]
pub struct ChunkingOutcome {
    pub chunks: Vec<CodeChunk>,
    /// True when the structural pass failed and the windowed fallback was
    /// used for a language that normally has a grammar.
    pub degraded: bool,
    pub language: Language,
}

/// Chunk size bounds and window geometry.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target window size in lines for the fallback split.
    pub window_lines: usize,
    /// Lines shared between consecutive windows.
    pub overlap_lines: usize,
    /// Chunks shorter than this merge into a neighbor.
    pub min_chunk_lines: usize,
    /// Chunks longer than this are re-split with the window strategy.
    pub max_chunk_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_lines: 48,
            overlap_lines: 8,
            min_chunk_lines: 5,
            max_chunk_lines: 96,
        }
    }
}

impl ChunkerConfig {
    pub fn with_window(mut self, window_lines: usize, overlap_lines: usize) -> Self {
        self.window_lines = window_lines;
        self.overlap_lines = overlap_lines;
        self
    }

    pub fn with_chunk_bounds(mut self, min_chunk_lines: usize, max_chunk_lines: usize) -> Self {
        self.min_chunk_lines = min_chunk_lines;
        self.max_chunk_lines = max_chunk_lines;
        self
    }
}

/// Splits file content into [`CodeChunk`]s. Stateless; safe to share.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk a file's content.
    ///
    /// The language is taken from `language_hint` when supplied, otherwise
    /// inferred from the path extension. Blank-only content yields an empty
    /// outcome.
    pub fn chunk(
        &self,
        source_path: &str,
        content: &str,
        language_hint: Option<Language>,
    ) -> ChunkingOutcome {
        let language =
            language_hint.unwrap_or_else(|| Language::from_path(Path::new(source_path)));

        let lines: Vec<&str> = content.lines().collect();
        if lines.iter().all(|line| line.trim().is_empty()) {
            return ChunkingOutcome {
                chunks: Vec::new(),
                degraded: false,
                language,
            };
        }

        let strategy = ChunkStrategy::for_language(
            language,
            self.config.window_lines,
            self.config.overlap_lines,
        );

        let (ranges, degraded) = match strategy {
            ChunkStrategy::Structural(lang) => match self.structural_ranges(&lines, lang) {
                Some(ranges) => (ranges, false),
                None => (self.windowed_ranges(0, lines.len()), true),
            },
            ChunkStrategy::Windowed { .. } => (self.windowed_ranges(0, lines.len()), false),
        };

        let chunks = ranges
            .into_iter()
            .map(|(start, end)| build_chunk(source_path, language, &lines, start, end))
            .collect();

        ChunkingOutcome {
            chunks,
            degraded,
            language,
        }
    }

    /// Compute chunk ranges aligned to top-level declarations, or `None` when
    /// the grammar finds nothing to anchor on in a file that needs splitting.
    fn structural_ranges(&self, lines: &[&str], language: Language) -> Option<Vec<Range>> {
        let boundaries: Vec<Regex> = boundary_patterns(language)
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        let attachments: Vec<Regex> = attachment_patterns(language)
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();

        let mut starts: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| boundaries.iter().any(|re| re.is_match(line)))
            .map(|(idx, _)| idx)
            .collect();

        // Pull each boundary up past attached decorator/attribute/doc lines,
        // without crossing the previous boundary.
        let mut adjusted: Vec<usize> = Vec::with_capacity(starts.len());
        for mut start in starts.drain(..) {
            let floor = adjusted.last().map_or(0, |prev| prev + 1);
            while start > floor && attachments.iter().any(|re| re.is_match(lines[start - 1])) {
                start -= 1;
            }
            if adjusted.last() != Some(&start) {
                adjusted.push(start);
            }
        }
        let starts = adjusted;

        if starts.is_empty() {
            // A short file is a single chunk; a long one needs the fallback.
            return if lines.len() <= self.config.window_lines {
                Some(vec![(0, lines.len())])
            } else {
                None
            };
        }

        let mut ranges = Vec::new();
        if starts[0] > 0 {
            // Preamble before the first declaration (imports, constants).
            ranges.push((0, starts[0]));
        }
        for pair in starts.windows(2) {
            ranges.push((pair[0], pair[1]));
        }
        ranges.push((starts[starts.len() - 1], lines.len()));

        let merged = merge_small(ranges, self.config.min_chunk_lines);
        Some(self.split_large(merged))
    }

    /// Sliding window over `[start, end)` line indices. Windows never split a
    /// line; consecutive windows share `overlap_lines`.
    fn windowed_ranges(&self, start: usize, end: usize) -> Vec<Range> {
        let window = self.config.window_lines.max(1);
        let overlap = self.config.overlap_lines.min(window - 1);
        let step = window - overlap;

        let mut ranges = Vec::new();
        let mut cursor = start;
        loop {
            let window_end = (cursor + window).min(end);
            ranges.push((cursor, window_end));
            if window_end == end {
                break;
            }
            cursor += step;
        }
        ranges
    }

    /// Re-split any range above the maximum with the window strategy.
    fn split_large(&self, ranges: Vec<Range>) -> Vec<Range> {
        let mut out = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            if end - start > self.config.max_chunk_lines {
                out.extend(self.windowed_ranges(start, end));
            } else {
                out.push((start, end));
            }
        }
        out
    }
}

type Range = (usize, usize);

/// Merge ranges shorter than `min_lines` into the following range; a trailing
/// fragment merges backward into the previous one. Ranges are contiguous, so
/// merging just extends endpoints.
fn merge_small(ranges: Vec<Range>, min_lines: usize) -> Vec<Range> {
    let mut out: Vec<Range> = Vec::new();
    let mut pending: Option<Range> = None;

    for range in ranges {
        let range = match pending.take() {
            Some(small) => (small.0, range.1),
            None => range,
        };
        if range.1 - range.0 < min_lines {
            pending = Some(range);
        } else {
            out.push(range);
        }
    }

    if let Some(small) = pending {
        match out.last_mut() {
            Some(last) => last.1 = small.1,
            None => out.push(small),
        }
    }
    out
}

fn build_chunk(
    source_path: &str,
    language: Language,
    lines: &[&str],
    start: usize,
    end: usize,
) -> CodeChunk {
    // Newline-terminate so every covered line survives a `lines()` round
    // trip, including trailing blank ones.
    let mut text = lines[start..end].join("\n");
    text.push('\n');
    let content_hash = *blake3::hash(text.as_bytes()).as_bytes();
    CodeChunk {
        id: chunk_id(source_path, start + 1, end, &content_hash),
        source_path: source_path.to_string(),
        language,
        start_line: start + 1,
        end_line: end,
        text,
        content_hash,
    }
}

/// Deterministic chunk id over (path, line range, content hash).
fn chunk_id(source_path: &str, start_line: usize, end_line: usize, content_hash: &[u8; 32]) -> ChunkId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_path.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(&(start_line as u64).to_le_bytes());
    hasher.update(&(end_line as u64).to_le_bytes());
    hasher.update(content_hash);
    *hasher.finalize().as_bytes()
}
