//! Amaryllis CLI.
//!
//! Commands:
//! - `config`   Show, validate, or initialize `~/.amaryllis/config.toml`
//! - `context`  Search a file of context items and preview augmented prompts

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "amaryllis",
    about = "Amaryllis - on-device LLM inference with context retrieval",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Query a JSON file of context items under the configured policy
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the config file location
    Path,
    /// Write a default config file if none exists
    Init,
}

#[derive(Subcommand)]
enum ContextAction {
    /// Rank items against a query
    Search {
        /// JSON array of context items
        #[arg(long)]
        items: PathBuf,

        query: String,

        /// Maximum results (defaults to context.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only match items carrying one of these tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Weight of recency against keyword overlap, 0.0 to 1.0
        #[arg(long)]
        recency_bias: Option<f64>,
    },

    /// Print the prompt a generation would receive after context injection
    Prompt {
        #[arg(long)]
        items: PathBuf,

        prompt: String,
    },

    /// Show store statistics before and after compaction
    Stats {
        #[arg(long)]
        items: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
        Commands::Context { action } => match action {
            ContextAction::Search {
                items,
                query,
                limit,
                tags,
                recency_bias,
            } => commands::context::search(&items, query, limit, tags, recency_bias).await?,
            ContextAction::Prompt { items, prompt } => {
                commands::context::prompt(&items, prompt).await?
            }
            ContextAction::Stats { items } => commands::context::stats(&items).await?,
        },
    }

    Ok(())
}
