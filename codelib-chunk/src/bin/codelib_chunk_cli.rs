use clap::Parser;
use codelib_chunk::{Chunker, ChunkerConfig, Language};
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk a source file into JSON output using codelib-chunk.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input source file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source path recorded in the chunks (used for language inference when
    /// reading from stdin).
    #[arg(short, long, default_value = "stdin")]
    path: String,

    /// Language override (rust, python, javascript, typescript, go, java, c,
    /// cpp, plain).
    #[arg(short, long)]
    language: Option<String>,

    /// Window size in lines for the fallback split.
    #[arg(long, default_value_t = 48)]
    window: usize,

    /// Overlap between consecutive windows in lines.
    #[arg(long, default_value_t = 8)]
    overlap: usize,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let (content, source_path) = if let Some(input_path) = &args.input {
        (fs::read_to_string(input_path)?, input_path.clone())
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        (buffer, args.path.clone())
    };

    let hint = match args.language.as_deref() {
        Some(name) => match Language::from_name(name) {
            Some(language) => Some(language),
            None => {
                eprintln!("Unknown language: {name}");
                std::process::exit(2);
            }
        },
        None => None,
    };

    let config = ChunkerConfig::default().with_window(args.window, args.overlap);
    let chunker = Chunker::new(config);
    let outcome = chunker.chunk(&source_path, &content, hint);

    if outcome.degraded {
        eprintln!(
            "note: structural parse found no boundaries in {source_path}, used windowed split"
        );
    }

    let json_output = serde_json::to_string_pretty(&outcome.chunks)?;
    println!("{json_output}");

    Ok(())
}
