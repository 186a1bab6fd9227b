//! Language detection and chunking strategy selection.
//!
//! A [`Language`] tag is inferred from the file extension (or supplied by the
//! upload collaborator as a hint) and maps to a [`ChunkStrategy`]: either a
//! structural grammar that knows where top-level declarations begin, or the
//! windowed fallback for everything else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Languages the chunker recognizes.
///
/// `Plain` covers everything without a structural grammar (markdown, config
/// files, unknown extensions); those files get the windowed split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Plain,
}

impl Language {
    /// Infer a language from a file path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("rs") => Language::Rust,
            Some("py") | Some("pyi") => Language::Python,
            Some("js") | Some("jsx") | Some("mjs") => Language::JavaScript,
            Some("ts") | Some("tsx") => Language::TypeScript,
            Some("go") => Language::Go,
            Some("java") => Language::Java,
            Some("c") | Some("h") => Language::C,
            Some("cpp") | Some("cc") | Some("cxx") | Some("hpp") => Language::Cpp,
            _ => Language::Plain,
        }
    }

    /// Parse a language from its lowercase name, as produced by `Display`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rust" => Some(Language::Rust),
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            "c" => Some(Language::C),
            "cpp" => Some(Language::Cpp),
            "plain" => Some(Language::Plain),
            _ => None,
        }
    }

    /// Whether a structural boundary grammar exists for this language.
    pub fn has_structural_grammar(&self) -> bool {
        !matches!(self, Language::Plain)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Plain => "plain",
        };
        write!(f, "{name}")
    }
}

/// How a file gets split into chunks.
///
/// Selected per file at chunk time from the language tag. `Structural` aligns
/// chunk boundaries to top-level declaration starts; `Windowed` slides a
/// fixed-size line window with overlap and never splits mid-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Structural(Language),
    Windowed { window: usize, overlap: usize },
}

impl ChunkStrategy {
    /// Pick the strategy for a language with the given window defaults.
    pub fn for_language(language: Language, window: usize, overlap: usize) -> Self {
        if language.has_structural_grammar() {
            ChunkStrategy::Structural(language)
        } else {
            ChunkStrategy::Windowed { window, overlap }
        }
    }
}

/// Regex patterns marking the start of a top-level declaration, one set per
/// structural language. Patterns are matched against whole lines.
pub(crate) fn boundary_patterns(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+\w+",
            r"^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+\w+",
            r"^(?:unsafe\s+)?impl\b",
            r"^(?:pub(?:\([^)]*\))?\s+)?mod\s+\w+",
            r"^macro_rules!\s*\w+",
        ],
        Language::Python => &[r"^(?:async\s+)?def\s+\w+", r"^class\s+\w+"],
        Language::JavaScript | Language::TypeScript => &[
            r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*\w*",
            r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+\w+",
            r"^(?:export\s+)?(?:const|let|var)\s+\w+\s*=\s*(?:async\s+)?(?:\(|function\b|\w+\s*=>)",
            r"^(?:export\s+)?interface\s+\w+",
        ],
        Language::Go => &[
            r"^func\s+(?:\([^)]*\)\s*)?\w+",
            r"^type\s+\w+\s+(?:struct|interface)\b",
        ],
        Language::Java => &[
            r"^(?:public\s+|final\s+|abstract\s+)*(?:class|interface|enum|record)\s+\w+",
        ],
        Language::C | Language::Cpp => &[
            r"^(?:template\s*<[^>]*>\s*)?(?:class|struct|namespace)\s+\w+",
            r"^(?:static\s+|inline\s+|extern\s+|const\s+)*[A-Za-z_][\w\s\*&:<>,~]*\s[\w~]+\s*\([^;]*$",
            r"^(?:static\s+|inline\s+|extern\s+|const\s+)*[A-Za-z_][\w\s\*&:<>,~]*\s[\w~]+\s*\([^;]*\)\s*\{?\s*$",
        ],
        Language::Plain => &[],
    }
}

/// Lines that attach to the declaration below them: a boundary is moved up
/// past these so decorators, attributes, and doc comments stay with their
/// item.
pub(crate) fn attachment_patterns(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[r"^#\[", r"^///"],
        Language::Python => &[r"^@\w+"],
        Language::JavaScript | Language::TypeScript => &[r"^@\w+", r"^/\*\*", r"^ \*"],
        Language::Java => &[r"^@\w+", r"^/\*\*", r"^ \*"],
        _ => &[],
    }
}
