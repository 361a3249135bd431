//! # Prompt RAG CLI (`promptrag`)
//!
//! ## Usage
//!
//! ```bash
//! promptrag --config ./config/promptrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `promptrag serve` | Start the HTTP server |
//! | `promptrag index` | Index the corpus once and print the load report |
//! | `promptrag search "<query>"` | Rank prompts for a query |
//! | `promptrag ask "<query>"` | Answer a question grounded in retrieved prompts |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to change verbosity.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use prompt_rag::{commands, config, server};
use prompt_rag_core::models::Language;

/// Prompt RAG: semantic search and grounded answers over a prompt library.
#[derive(Parser)]
#[command(name = "promptrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// See `config/promptrag.example.toml` for every setting.
    #[arg(long, global = true, default_value = "./config/promptrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and indexes the corpus in the background.
    Serve,

    /// Index the corpus and print a per-item report.
    Index,

    /// Search the prompt library.
    Search {
        query: String,

        /// Number of results (defaults to `retrieval.search_top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question answered from the prompt library.
    Ask {
        query: String,

        /// Number of prompts used as context (defaults to `retrieval.ask_top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Answer language: `en` or `tr`.
        #[arg(long, default_value = "en")]
        language: Language,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Search { top_k: Some(k), .. } | Commands::Ask { top_k: Some(k), .. } = &cli.command {
        if *k == 0 || *k > cfg.retrieval.max_top_k {
            anyhow::bail!("--top-k must be between 1 and {}", cfg.retrieval.max_top_k);
        }
    }

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index => {
            commands::run_index(&cfg).await?;
        }
        Commands::Search { query, top_k, json } => {
            commands::run_search(&cfg, &query, top_k, json).await?;
        }
        Commands::Ask {
            query,
            top_k,
            language,
        } => {
            commands::run_ask(&cfg, &query, top_k, language).await?;
        }
    }

    Ok(())
}
