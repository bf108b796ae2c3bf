use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use llmdoc::app::App;
use llmdoc::config::load_config;
use llmdoc::{refresh, server, tools};

#[derive(Parser)]
#[command(
    name = "llmdoc",
    about = "Local documentation search over llms.txt sources, exposed as an MCP server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio (default)
    Serve,

    /// Search indexed documentation
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Filter by source name
        #[arg(long)]
        source: Option<String>,
    },

    /// Retrieve a document by URL
    Get {
        /// Document URL (as returned by search)
        url: String,

        /// Character offset to start from
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Maximum characters to print
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },

    /// List configured sources and their statistics
    Sources,

    /// Fetch all sources and rebuild the index
    Refresh,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON-RPC stream; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config();
    let command = Cli::parse().command.unwrap_or(Commands::Serve);

    match command {
        Commands::Serve => run_serve(config).await?,
        Commands::Search {
            query,
            limit,
            source,
        } => {
            let app = App::new(config).await?;
            let results = tools::search_docs(&app, &query, limit, source.as_deref()).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.4}] {} / {}", i + 1, r.score, r.source, r.title);
                println!("    url: {}", r.url);
                println!("    excerpt: \"{}\"", r.snippet.replace('\n', " "));
                println!();
            }
            app.close().await;
        }
        Commands::Get { url, offset, limit } => {
            let app = App::new(config).await?;
            let doc = tools::get_doc(&app, &url, offset, limit).await?;
            println!("--- {} ---", doc.title);
            println!("url:    {}", doc.url);
            println!("source: {}", doc.source);
            println!(
                "range:  {}..{} of {}{}",
                doc.offset,
                doc.offset + doc.length,
                doc.total_length,
                if doc.has_more { " (more)" } else { "" }
            );
            println!();
            println!("{}", doc.content);
            app.close().await;
        }
        Commands::Sources => {
            let app = App::new(config).await?;
            let sources = tools::list_sources(&app).await?;
            println!("{:<20} {:>6} {:<24} URL", "SOURCE", "DOCS", "LAST UPDATED");
            for s in &sources {
                let updated = s
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:<20} {:>6} {:<24} {}", s.name, s.doc_count, updated, s.url);
            }
            app.close().await;
        }
        Commands::Refresh => {
            let app = App::new(config).await?;
            let result = tools::refresh_sources(&app).await?;
            if result.skipped {
                println!("skipped: {}", result.reason.as_deref().unwrap_or(""));
            } else {
                println!(
                    "refreshed {} documents ({} indexed, {} chunks)",
                    result.refreshed_count, result.indexed_documents, result.indexed_chunks
                );
                for s in &result.sources {
                    println!("  {:<20} {} docs, {} errors", s.name, s.doc_count, s.errors);
                }
                if let Some(errors) = &result.errors {
                    for e in errors {
                        eprintln!("error: {e}");
                    }
                }
            }
            app.close().await;
        }
    }

    Ok(())
}

async fn run_serve(config: llmdoc::config::Config) -> anyhow::Result<()> {
    if config.sources.is_empty() {
        warn!("no documentation sources configured; set LLMDOC_SOURCES or create llmdoc.json");
    }

    let app = Arc::new(App::new(config).await?);
    info!(
        sources = app.config.sources.len(),
        db = %app.config.db_path.display(),
        "initialized"
    );

    if refresh::needs_startup_refresh(&app).await? {
        info!("triggering startup refresh");
        match refresh::refresh_all(&app).await {
            Ok(result) if result.skipped => {
                info!(reason = result.reason.as_deref().unwrap_or(""), "startup refresh skipped");
            }
            Ok(result) => info!(docs = result.refreshed_count, "startup refresh completed"),
            Err(e) => error!("startup refresh failed: {e:#}"),
        }
    }

    let shutdown = CancellationToken::new();
    let ticker = tokio::spawn(refresh::periodic_refresh(app.clone(), shutdown.clone()));

    let served = server::serve_stdio(app.clone()).await;

    shutdown.cancel();
    let _ = ticker.await;
    app.close().await;
    info!("server shutdown complete");

    served
}
