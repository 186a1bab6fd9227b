use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use codelib_chunk::Language;
use codelib_embed::{
    CachedEmbedder, DiskCacheStore, EmbedConfig, EmbeddingProvider, FastEmbedProvider,
    HashEmbedder,
};
use codelib_retriever::retrieval::{Library, LibraryConfig, Query};
use serde::Serialize;

/// Index a codebase and retrieve semantically similar chunks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory containing the .codelib.db database file
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Use the deterministic hash embedder instead of the ONNX model
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the library database
    Init,
    /// Index files or directories into the library
    Index {
        /// Files or directories to index
        paths: Vec<PathBuf>,
    },
    /// Search for chunks similar to a query
    Search {
        /// The query text
        query: String,
        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        /// Only return chunks in this language (e.g. rust, python)
        #[arg(short, long)]
        language: Option<String>,
        /// Only return chunks whose path starts with this prefix
        #[arg(short, long)]
        path_prefix: Option<String>,
        /// Minimum similarity score (0.0 to 1.0)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Build an augmented prompt for a generation request
    Augment {
        /// The generation request to augment
        request: String,
    },
    /// Remove a file from the library
    Remove {
        /// Source path as it was indexed
        path: String,
    },
    /// Show library statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List indexed files
    Files,
    /// Re-chunk and re-embed everything from retained content
    Rebuild,
    /// Drop all indexed files and chunks
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct HitOutput {
    source_path: String,
    language: String,
    start_line: usize,
    end_line: usize,
    score: f32,
    text: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let library = open_library(&args).await?;

    match args.command {
        Commands::Init => {
            println!("Initialized library at {}", args.base_dir.display());
            println!("Database location: {}/.codelib.db", args.base_dir.display());
            Ok(())
        }
        Commands::Index { paths } => {
            let files = collect_files(&paths)?;
            if files.is_empty() {
                println!("No indexable files found");
                return Ok(());
            }
            let cancel = AtomicBool::new(false);
            let report = library.index_files(&files, &cancel).await?;
            println!(
                "Indexed {} files ({} unchanged), {} chunks",
                report.files_indexed, report.files_unchanged, report.chunks_added
            );
            if report.embed_failures > 0 {
                eprintln!("{} chunks failed to embed", report.embed_failures);
            }
            for path in &report.degraded_files {
                eprintln!("note: {path} had no structural boundaries, used windowed chunks");
            }
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            language,
            path_prefix,
            threshold,
            format,
        } => {
            let mut q = Query::new(query).with_top_k(top_k);
            if let Some(name) = language {
                let lang = Language::from_name(&name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown language: {name}"))?;
                q = q.with_language(lang);
            }
            if let Some(prefix) = path_prefix {
                q = q.with_path_prefix(prefix);
            }
            if let Some(t) = threshold {
                q = q.with_threshold(t);
            }

            let result = library.retrieve(&q).await?;
            if result.query_embedding_failed {
                return Err(codelib_retriever::EngineError::QueryEmbeddingFailed.into());
            }
            let outputs: Vec<HitOutput> = result
                .hits
                .iter()
                .map(|hit| HitOutput {
                    source_path: hit.chunk.source_path.clone(),
                    language: hit.chunk.language.to_string(),
                    start_line: hit.chunk.start_line,
                    end_line: hit.chunk.end_line,
                    score: hit.score,
                    text: hit.chunk.text.clone(),
                })
                .collect();

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&outputs)?);
                }
                OutputFormat::Summary => {
                    for hit in &outputs {
                        println!(
                            "{:.3}  {} ({}:{}-{})",
                            hit.score, hit.source_path, hit.language, hit.start_line, hit.end_line
                        );
                    }
                    if outputs.is_empty() {
                        println!("No results above threshold");
                    }
                }
                OutputFormat::Full => {
                    for hit in &outputs {
                        println!(
                            "=== {:.3}  {} (lines {}-{}) ===",
                            hit.score, hit.source_path, hit.start_line, hit.end_line
                        );
                        println!("{}\n", hit.text);
                    }
                }
            }
            Ok(())
        }
        Commands::Augment { request } => {
            println!("{}", library.augment_request(&request).await?);
            Ok(())
        }
        Commands::Remove { path } => {
            let removed = library.remove_path(&path).await?;
            println!("Removed {removed} chunks for {path}");
            Ok(())
        }
        Commands::Stats { format } => {
            let stats = library.stats().await?;
            match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "files": stats.store.files,
                            "chunks": stats.store.chunks,
                            "embedded_chunks": stats.store.embedded_chunks,
                            "index_entries": stats.index_entries,
                            "model_id": stats.model_id,
                            "dimension": stats.dimension,
                        })
                    );
                }
                _ => {
                    println!("Files:           {}", stats.store.files);
                    println!("Chunks:          {}", stats.store.chunks);
                    println!("Embedded chunks: {}", stats.store.embedded_chunks);
                    println!("Index entries:   {}", stats.index_entries);
                    println!("Model:           {}", stats.model_id);
                    println!("Dimension:       {}", stats.dimension);
                }
            }
            Ok(())
        }
        Commands::Files => {
            for record in library.list_files().await? {
                println!(
                    "{}  {} bytes  indexed {}",
                    record.source_path, record.size, record.indexed_at
                );
            }
            Ok(())
        }
        Commands::Rebuild => {
            library.rebuild().await?;
            let stats = library.stats().await?;
            println!(
                "Rebuilt index: {} chunks from {} files",
                stats.store.chunks, stats.store.files
            );
            Ok(())
        }
        Commands::Clear => {
            library.clear().await?;
            println!("Library cleared");
            Ok(())
        }
    }
}

async fn open_library(args: &Args) -> anyhow::Result<Library> {
    let embedder: Arc<dyn EmbeddingProvider> = if args.offline {
        Arc::new(HashEmbedder::default())
    } else {
        let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
        let cache = DiskCacheStore::open(args.base_dir.join(".codelib-cache.json"))?;
        Arc::new(CachedEmbedder::new(provider, Box::new(cache)))
    };
    Ok(Library::open(&args.base_dir, embedder, LibraryConfig::new()).await?)
}

/// Expands the given paths into `(path, content)` pairs. Directories are
/// walked recursively; hidden entries and common build output are skipped,
/// and only files with a recognized source extension are picked up. Files
/// named explicitly are always included.
fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<(String, String)>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut files)?;
        } else {
            let content = std::fs::read_to_string(path)?;
            files.push((path.to_string_lossy().to_string(), content));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn walk_dir(dir: &Path, files: &mut Vec<(String, String)>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else if Language::from_path(&path).has_structural_grammar() {
            // Binary or unreadable files are skipped rather than aborting the run.
            match std::fs::read_to_string(&path) {
                Ok(content) => files.push((path.to_string_lossy().to_string(), content)),
                Err(err) => tracing::debug!("skipping {}: {err}", path.display()),
            }
        }
    }
    Ok(())
}
