use clap::{Parser, Subcommand};
use semantic_code::config::{self, IndexerConfig};
use semantic_code::embedder::{Embedder, LocalEmbedder};
use semantic_code::indexer::Indexer;
use semantic_code::mcp::run_mcp_server;
use semantic_code::reranker::{LocalReranker, Reranker};
use semantic_code::search::{SearchOrchestrator, SearchRequest};
use semantic_code::store::VectorStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semantic-code")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Semantic code search over a codebase, with an MCP server mode")]
struct Cli {
    /// Run as an MCP stdio server instead of a one-shot CLI search.
    #[arg(long)]
    mcp: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Repository root to operate on (defaults to SEMANTIC_CODE_ROOT or cwd).
    root: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the index without searching.
    Index,
    /// Run a one-shot search against the index.
    Search {
        query: String,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        file_pattern: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Skip the cross-encoder reranking pass (on by default).
        #[arg(long)]
        no_rerank: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = config::resolve_root(cli.root.as_deref())?;

    if cli.mcp {
        return run_mcp_server(root).await;
    }

    match cli.command {
        Some(Commands::Index) => {
            let (_orchestrator, indexer) = build_runtime(&root).await?;
            let stats = indexer.run().await?;
            println!(
                "indexed {} file(s), {} unchanged, {} skipped, {} deleted, {} chunk(s) in {} ms",
                stats.files_indexed,
                stats.files_unchanged,
                stats.files_skipped,
                stats.files_deleted,
                stats.chunks_indexed,
                stats.duration_ms
            );
        }
        Some(Commands::Search { query, path, file_pattern, limit, no_rerank }) => {
            let (orchestrator, indexer) = build_runtime(&root).await?;
            indexer.run().await?;

            let request = SearchRequest {
                query,
                path,
                file_pattern,
                limit,
                use_reranking: !no_rerank,
                candidate_multiplier: None,
            };
            let results = orchestrator.search(&request).await?;
            print_results(&results);
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
        }
    }

    Ok(())
}

async fn build_runtime(root: &std::path::Path) -> anyhow::Result<(SearchOrchestrator, Arc<Indexer>)> {
    let index_path = config::resolve_index_path(root);
    let store = Arc::new(VectorStore::open(&index_path).await?);
    let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::load()?);
    let reranker: Option<Arc<dyn Reranker>> = match LocalReranker::load() {
        Ok(r) => Some(Arc::new(r) as Arc<dyn Reranker>),
        Err(e) => {
            tracing::warn!(error = %e, "reranker unavailable, continuing without it");
            None
        }
    };

    let indexer = Arc::new(Indexer::new(root.to_path_buf(), IndexerConfig::default(), Arc::clone(&store), Arc::clone(&embedder)));
    let orchestrator = SearchOrchestrator::new(store, embedder, reranker);
    Ok((orchestrator, indexer))
}

fn print_results(results: &[semantic_code::search::SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        println!(
            "\n{}. {}:{}-{} (score: {:.3})",
            i + 1,
            result.file_path,
            result.start_line,
            result.end_line,
            result.combined_score
        );
        if let Some(name) = &result.name {
            println!("   {} {}", result.node_type, name);
        }
        println!("--------------------------------------------------");
        println!("{}", result.content);
        println!("--------------------------------------------------");
    }
}
