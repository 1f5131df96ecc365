use clap::{Parser, Subcommand};
use quarry_embed::FastEmbedProvider;
use quarry_retriever::config::QuarryConfig;
use quarry_retriever::query::{ModelInfo, OllamaClient, QueryEngine, QueryResponse};
use quarry_retriever::retrieval::{
    ContextRetriever, IndexBuilder, IndexBuilderConfig, RetrievedContext, SearchFilter,
};
use quarry_retriever::storage::VectorIndex;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A CLI for building and querying a local RAG knowledge base.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a quarry.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory for the index database (overrides the config file)
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the index from a JSON corpus file
    Build {
        /// Corpus file containing an array of documents
        corpus: PathBuf,
        /// Rebuild even if a complete index already exists
        #[arg(long)]
        force: bool,
    },
    /// Show index and chunk statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Retrieve context for a query without generating an answer
    Search {
        /// Query text
        query: String,
        /// Only consider chunks with this category
        #[arg(long)]
        category: Option<String>,
        /// Only consider chunks from this source
        #[arg(long)]
        source: Option<String>,
        /// Filter near-duplicate chunks out of the results
        #[arg(long)]
        diverse: bool,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Ask a single question and print the generated answer
    Ask {
        /// Question text
        question: String,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Interactive question answering session
    Chat,
    /// Show index health, embedding models, and Ollama connectivity
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
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
struct OllamaStatus {
    base_url: String,
    configured_model: String,
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<ModelInfo>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = QuarryConfig::load(args.config.as_deref())?;
    if let Some(base_dir) = args.base_dir {
        config.index.base_dir = base_dir;
    }
    config.validate()?;

    match args.command {
        Commands::Build { corpus, force } => {
            let builder_config = IndexBuilderConfig::new(&config.index.base_dir)
                .with_chunker(config.chunker.clone())
                .with_embedding(config.embedding.clone())
                .with_force_rebuild(force);
            let builder = IndexBuilder::new(builder_config).await?;
            let stats = builder.build_from_path(&corpus).await?;

            println!(
                "Indexed {} documents into {}",
                stats.documents_loaded,
                config.index.base_dir.display()
            );
            println!("  Chunks created: {}", stats.chunks_created);
            println!("  Embeddings generated: {}", stats.embeddings_generated);
            if stats.documents_failed > 0 {
                println!("  Documents skipped: {}", stats.documents_failed);
            }
            if stats.errors > 0 {
                println!("  Errors: {}", stats.errors);
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let index = VectorIndex::open(&config.index.base_dir).await?;
            let stats = index.stats().await?;
            let chunk_sizes = index.chunk_size_summary().await?;
            let by_category = index.count_chunks_by_category().await?;
            let by_source = index.count_chunks_by_source().await?;

            match format {
                OutputFormat::Json => {
                    #[derive(Serialize)]
                    struct StatsOutput {
                        index: quarry_retriever::storage::IndexStats,
                        chunk_sizes: Option<quarry_retriever::storage::ChunkSizeSummary>,
                        chunks_by_category: Vec<(String, i64)>,
                        chunks_by_source: Vec<(String, i64)>,
                    }
                    let output = StatsOutput {
                        index: stats,
                        chunk_sizes,
                        chunks_by_category: by_category,
                        chunks_by_source: by_source,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Index Statistics:");
                    println!("  Documents: {}", stats.documents_count);
                    println!(
                        "  Chunks: {} ({} embedded)",
                        stats.chunks_count, stats.embeddings_count
                    );
                    println!("  Registered models: {}", stats.models_count);
                    if let Some(sizes) = &chunk_sizes {
                        println!(
                            "  Chunk sizes: avg {:.1} / min {} / max {} ({} characters total)",
                            sizes.avg_chunk_size,
                            sizes.min_chunk_size,
                            sizes.max_chunk_size,
                            sizes.total_characters
                        );
                    }
                    if !by_category.is_empty() {
                        println!("  Chunks by category:");
                        for (category, count) in &by_category {
                            println!("    {category}: {count}");
                        }
                    }
                    if !by_source.is_empty() {
                        println!("  Chunks by source:");
                        for (source, count) in &by_source {
                            println!("    {source}: {count}");
                        }
                    }

                    if format == OutputFormat::Full {
                        let documents = index.get_all_documents().await?;
                        if !documents.is_empty() {
                            println!("  Documents:");
                            for doc in documents.iter().take(20) {
                                println!(
                                    "    {} | {} | {} | {} chars | {}",
                                    doc.id,
                                    doc.source,
                                    doc.category,
                                    doc.original_length,
                                    hex::encode(doc.content_hash)
                                );
                            }
                            if documents.len() > 20 {
                                println!("    ... and {} more", documents.len() - 20);
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            category,
            source,
            diverse,
            format,
        } => {
            if diverse && (category.is_some() || source.is_some()) {
                return Err(anyhow::anyhow!(
                    "--diverse cannot be combined with --category or --source"
                ));
            }

            let retriever = open_retriever(&config).await?;
            let result = if diverse {
                retriever.retrieve_diverse(&query).await?
            } else if category.is_some() || source.is_some() {
                let filter = SearchFilter { category, source };
                retriever.retrieve_filtered(&query, &filter).await?
            } else {
                retriever.retrieve(&query).await?
            };

            print_context(&result, &format)?;
            Ok(())
        }
        Commands::Ask { question, format } => {
            let engine = build_engine(&config).await?;
            engine.connect().await?;
            let response = engine.query(&question).await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Summary => {
                    println!("{}", response.response);
                }
                OutputFormat::Full => {
                    print_answer(&response);
                }
            }
            Ok(())
        }
        Commands::Chat => {
            let engine = build_engine(&config).await?;
            engine.connect().await?;
            chat_loop(&engine).await
        }
        Commands::Status { format } => {
            let index = VectorIndex::open(&config.index.base_dir).await?;
            let health = index.health().await?;
            let metadata = index.metadata().await?;
            let models = index.get_registered_models().await?;
            let ollama = check_ollama(&config).await;

            match format {
                OutputFormat::Json => {
                    #[derive(Serialize)]
                    struct StatusOutput {
                        health: quarry_retriever::storage::IndexHealth,
                        metadata: Option<quarry_retriever::storage::IndexMetadata>,
                        embedding_models: Vec<quarry_retriever::storage::EmbeddingModelInfo>,
                        ollama: OllamaStatus,
                    }
                    let output = StatusOutput {
                        health,
                        metadata,
                        embedding_models: models,
                        ollama,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Quarry Status");
                    println!("=============");

                    println!("\n📊 Index:");
                    println!(
                        "  Location: {}",
                        config.index.base_dir.display()
                    );
                    println!(
                        "  Ready: {}",
                        if health.complete && health.embedded_chunks > 0 {
                            "Yes"
                        } else {
                            "No"
                        }
                    );
                    match &metadata {
                        Some(meta) => {
                            println!("  Documents: {}", meta.documents_count);
                            println!("  Chunks: {}", meta.chunks_count);
                            println!("  Built with: {}", meta.model_id);
                            println!("  Built at: {}", format_timestamp(meta.created_at));
                            println!("  Built by version: {}", meta.crate_version);
                        }
                        None => println!("  No completed build"),
                    }

                    println!("\n💚 Health:");
                    println!(
                        "  Database connected: {}",
                        if health.database_connected { "Yes" } else { "No" }
                    );
                    println!(
                        "  Database integrity: {}",
                        if health.database_integrity_ok {
                            "OK"
                        } else {
                            "Issues found"
                        }
                    );
                    println!("  Embedded chunks: {}", health.embedded_chunks);

                    println!("\n🤖 Embedding Models:");
                    if models.is_empty() {
                        println!("  None registered");
                    } else {
                        for model in &models {
                            println!(
                                "  {} ({} dims, {})",
                                model.model_id(),
                                model.dimension,
                                if model.normalized { "normalized" } else { "raw" }
                            );
                        }
                    }

                    println!("\n🦙 Ollama:");
                    println!("  Server: {}", ollama.base_url);
                    if ollama.reachable {
                        println!("  Reachable: Yes");
                        match &ollama.model {
                            Some(model) => {
                                println!("  Model {}: available", model.name);
                                if model.size > 0 {
                                    println!("  Model size: {} bytes", model.size);
                                }
                            }
                            None => println!(
                                "  Model {}: not installed",
                                ollama.configured_model
                            ),
                        }
                    } else {
                        println!("  Reachable: No");
                        if let Some(error) = &ollama.error {
                            println!("  Error: {error}");
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn format_timestamp(epoch_secs: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| epoch_secs.to_string())
}

async fn open_retriever(config: &QuarryConfig) -> anyhow::Result<ContextRetriever> {
    let provider = FastEmbedProvider::create(config.embedding.clone()).await?;
    let index = VectorIndex::open(&config.index.base_dir)
        .await?
        .with_provider(Arc::new(provider));
    Ok(ContextRetriever::new(
        Arc::new(index),
        config.retriever.clone(),
    )?)
}

async fn build_engine(config: &QuarryConfig) -> anyhow::Result<QueryEngine> {
    let retriever = open_retriever(config).await?;
    Ok(QueryEngine::new(retriever, config.ollama.clone())?)
}

async fn check_ollama(config: &QuarryConfig) -> OllamaStatus {
    let mut status = OllamaStatus {
        base_url: config.ollama.base_url.clone(),
        configured_model: config.ollama.model.clone(),
        reachable: false,
        error: None,
        model: None,
    };
    let client = match OllamaClient::new(config.ollama.clone()) {
        Ok(client) => client,
        Err(e) => {
            status.error = Some(e.to_string());
            return status;
        }
    };
    match client.model_info().await {
        Ok(model) => {
            status.reachable = true;
            status.model = model;
        }
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

fn print_context(result: &RetrievedContext, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Summary => {
            if let Some(message) = &result.message {
                println!("{message}");
                return Ok(());
            }
            println!(
                "Found {} chunks ({} characters):",
                result.total_chunks, result.context_length
            );
            for (i, source) in result.sources.iter().enumerate() {
                println!(
                    "  {}. {} | {} | {} | score {:.3}",
                    i + 1,
                    source.chunk_id,
                    source.source,
                    source.category,
                    source.similarity_score
                );
            }
            println!(
                "Context preview: {}",
                result.context.chars().take(200).collect::<String>()
            );
        }
        OutputFormat::Full => {
            if let Some(message) = &result.message {
                println!("{message}");
                return Ok(());
            }
            println!("Context:\n{}", result.context);
            println!("---");
            println!("Sources ({} chunks):", result.sources.len());
            for (i, source) in result.sources.iter().enumerate() {
                println!(
                    "  {}. {} | {} | {} | score {:.3} | {} chars",
                    i + 1,
                    source.chunk_id,
                    source.source,
                    source.category,
                    source.similarity_score,
                    source.chunk_size
                );
            }
        }
    }
    Ok(())
}

fn print_answer(response: &QueryResponse) {
    println!("{}", response.response);
    if !response.sources.is_empty() {
        println!("\nSources used ({} chunks):", response.sources.len());
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  {}. {} | {} | score {:.3}",
                i + 1,
                source.source,
                source.category,
                source.similarity_score
            );
        }
    }
    if let Some(stats) = &response.generation_stats {
        println!("\nGeneration:");
        println!("  Tokens: {}", stats.eval_count);
        if stats.eval_duration > 0 {
            println!(
                "  Speed: {:.1} tokens/sec",
                stats.eval_count as f64 * 1_000_000_000.0 / stats.eval_duration as f64
            );
        }
    }
    if let Some(error) = &response.error {
        println!("\nError: {error}");
    }
}

async fn chat_loop(engine: &QueryEngine) -> anyhow::Result<()> {
    println!("Starting interactive session (model {})", engine.model_name());
    println!("Type 'exit' to quit, 'help' for commands");
    println!("{}", "-".repeat(50));

    let stdin = std::io::stdin();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!("\nGoodbye!");
            break;
        }
        let input = line.trim();

        match input.to_lowercase().as_str() {
            "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                println!("Available commands:");
                println!("  exit - Quit the session");
                println!("  help - Show this help message");
                println!("  Just type your question to get an answer");
                continue;
            }
            "" => continue,
            _ => {}
        }

        match engine.query(input).await {
            Ok(response) => {
                println!("\nAssistant: {}", response.response);
                if !response.sources.is_empty() {
                    println!("\nSources used ({} chunks):", response.sources.len());
                    for (i, source) in response.sources.iter().take(3).enumerate() {
                        println!(
                            "  {}. {} (Score: {:.3})",
                            i + 1,
                            source.source,
                            source.similarity_score
                        );
                    }
                }
            }
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}
