//! # Campus RAG CLI (`rag`)
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag index [--force]` | Bring the index and document cache in line with storage |
//! | `rag search "<query>"` | Show ranked passages for a query |
//! | `rag ask "<question>"` | Answer one question with citations |
//! | `rag chat` | Interactive conversation on stdin |
//! | `rag cache status` | Show whether the document cache is current |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use campus_rag::app::App;
use campus_rag::{commands, config};

/// Campus RAG: answers questions from university documents.
#[derive(Parser)]
#[command(name = "rag", version, about = "Retrieval-augmented QA over a university document corpus")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents from storage.
    ///
    /// Skips all work when the document cache matches storage and the
    /// index is complete.
    Index {
        /// Ignore the cache and rebuild the index from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Search the index without generating an answer.
    Search {
        query: String,

        /// Number of passages (capped by retrieval.k_max).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Conversation id.
        #[arg(long, default_value = "cli")]
        conversation: String,
    },

    /// Interactive chat on stdin.
    Chat {
        #[arg(long, default_value = "cli")]
        conversation: String,
    },

    /// Document cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Compare the cache against storage.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = App::from_config(cfg).await?;

    match cli.command {
        Commands::Index { force } => commands::run_index(&app, force).await?,
        Commands::Search { query, k } => commands::run_search(&app, &query, k).await?,
        Commands::Ask {
            question,
            conversation,
        } => commands::run_ask(&app, &question, &conversation).await?,
        Commands::Chat { conversation } => commands::run_chat(&app, &conversation).await?,
        Commands::Cache {
            action: CacheAction::Status,
        } => commands::run_cache_status(&app).await?,
    }

    app.index.close().await;
    Ok(())
}
