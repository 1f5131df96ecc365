use clap::Parser;
use quarry_chunk::{
    ChunkStatistics, ChunkerConfig, Result, TextChunker, load_documents,
    load_documents_from_reader, write_chunks_json,
};
use quarry_chunk::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use std::path::PathBuf;
use std::process;

/// Split a JSON document corpus into overlapping chunks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Corpus JSON file (reads stdin when omitted)
    input: Option<PathBuf>,

    /// Maximum chunk size in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters of overlap between consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Write chunks to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print chunk statistics instead of the chunks themselves
    #[arg(long)]
    stats: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let documents = match &args.input {
        Some(path) => load_documents(path)?,
        None => load_documents_from_reader(std::io::stdin().lock())?,
    };

    let config = ChunkerConfig::new(args.chunk_size, args.chunk_overlap);
    let chunker = TextChunker::new(config)?;
    let chunks = chunker.chunk_documents(&documents);

    if args.stats {
        let stats = ChunkStatistics::from_chunks(&chunks);
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    match &args.output {
        Some(path) => write_chunks_json(&chunks, path)?,
        None => println!("{}", serde_json::to_string_pretty(&chunks)?),
    }
    Ok(())
}
