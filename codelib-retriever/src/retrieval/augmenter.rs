//! Greedy context packing for prompt augmentation.
//!
//! Retrieved chunks are rendered as numbered, fenced code blocks and packed
//! best-first into a character budget. A chunk is never truncated: packing
//! stops at the first chunk that would overflow, so the prompt always contains
//! whole examples.

use super::vector_index::SearchHit;

/// Budget and framing for [`augment_prompt`].
#[derive(Debug, Clone)]
pub struct AugmenterConfig {
    /// Upper bound on the rendered context, in characters.
    pub max_context_chars: usize,
    /// Heading placed above the packed examples.
    pub context_header: String,
}

impl Default for AugmenterConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 8_000,
            context_header: "Relevant code from the indexed library:".to_string(),
        }
    }
}

/// The rendered context plus bookkeeping about what made it in.
#[derive(Debug, Clone)]
pub struct PackedContext {
    pub rendered: String,
    pub included: usize,
    pub omitted: usize,
}

/// Renders one hit as a numbered example with a fenced code block.
fn render_example(ordinal: usize, hit: &SearchHit) -> String {
    let chunk = &hit.chunk;
    format!(
        "Code Example {ordinal} (from {path}, lines {start}-{end}):\n```{lang}\n{text}\n```\n",
        path = chunk.source_path,
        start = chunk.start_line,
        end = chunk.end_line,
        lang = chunk.language,
        text = chunk.text.trim_end_matches('\n'),
    )
}

/// Packs hits best-first into `max_context_chars`.
///
/// Hits must arrive in ranked order. Packing stops at the first example that
/// would push the rendered context past the budget, even if a later, smaller
/// example would still fit: keeping the order strictly score-descending is
/// worth more than squeezing in every byte.
pub fn pack_context(hits: &[SearchHit], config: &AugmenterConfig) -> PackedContext {
    let mut rendered = String::new();
    let mut included = 0;

    for hit in hits {
        let example = render_example(included + 1, hit);
        let separator = if rendered.is_empty() { 0 } else { 1 };
        if rendered.len() + separator + example.len() > config.max_context_chars {
            break;
        }
        if separator == 1 {
            rendered.push('\n');
        }
        rendered.push_str(&example);
        included += 1;
    }

    PackedContext {
        rendered,
        included,
        omitted: hits.len() - included,
    }
}

/// Builds the final prompt: header, packed examples, then the user's request.
/// With no usable hits the request is returned unchanged.
pub fn augment_prompt(request: &str, hits: &[SearchHit], config: &AugmenterConfig) -> String {
    let packed = pack_context(hits, config);
    if packed.included == 0 {
        return request.to_string();
    }
    format!(
        "{header}\n\n{context}\n{request}",
        header = config.context_header,
        context = packed.rendered,
    )
}
