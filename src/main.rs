//! # UNAi CLI (`unai`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `unai init` | Create the SQLite database and run schema migrations |
//! | `unai serve` | Start the chat HTTP server |
//! | `unai import <file>` | Import knowledge documents from JSON or CSV |
//! | `unai clear` | Delete knowledge documents |
//! | `unai usage` | Show remaining quota per API key |
//! | `unai provider get\|set` | Read or change the active chat provider |
//!
//! API keys are read from the environment (`GROQ_API_KEY_1..5`,
//! `GEMINI_API_KEY_1..5`, `EMBEDDING_API_KEY`); everything else comes from
//! the `--config` file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use unai::config::{self, Secrets};
use unai::sqlite_store::SqliteStore;
use unai::{ingest, migrate, server, usage};
use unai_core::keys::ProviderTag;
use unai_core::store::{SettingsStore, AI_PROVIDER_SETTING};

/// UNAi support chatbot service.
#[derive(Parser)]
#[command(
    name = "unai",
    about = "UNAi — retrieval-grounded support chatbot with multi-key provider rotation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/unai.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the chat HTTP server on `[server].bind`.
    Serve,

    /// Import knowledge documents from a `.json` array or `.csv` export.
    ///
    /// Rows are normalised, duplicates skipped, and embeddings generated in
    /// batches of five when an embedding key is configured.
    Import {
        /// Path to the file to import.
        path: PathBuf,

        /// `sheet_source` recorded for rows that do not carry one.
        #[arg(long, default_value = ingest::DEFAULT_SHEET_SOURCE)]
        source: String,

        /// Insert without generating embeddings.
        #[arg(long)]
        no_embed: bool,
    },

    /// Delete knowledge documents. The usage ledger is not touched.
    Clear {
        /// Only delete documents from this `sheet_source`.
        #[arg(long)]
        source: Option<String>,
    },

    /// Show remaining daily quota for each configured key.
    Usage,

    /// Read or change the active chat provider.
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// Print the active chat provider.
    Get,
    /// Persist a new active chat provider (`groq` or `gemini`).
    Set { name: String },
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

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg, Secrets::from_env()).await?;
        }
        Commands::Import {
            path,
            source,
            no_embed,
        } => {
            ingest::run_import(&cfg, &Secrets::from_env(), &path, &source, no_embed).await?;
        }
        Commands::Clear { source } => {
            ingest::run_clear(&cfg, source.as_deref()).await?;
        }
        Commands::Usage => {
            usage::run_usage(&cfg, &Secrets::from_env()).await?;
        }
        Commands::Provider { action } => {
            let store = SqliteStore::open(&cfg).await?;
            match action {
                ProviderAction::Get => {
                    let active = store
                        .get_setting(AI_PROVIDER_SETTING)
                        .await?
                        .and_then(|v| v.parse::<ProviderTag>().ok())
                        .filter(|t| *t != ProviderTag::Embedding)
                        .unwrap_or(cfg.generation.default_provider);
                    println!("{}", active);
                }
                ProviderAction::Set { name } => {
                    let tag: ProviderTag = name.parse()?;
                    if tag == ProviderTag::Embedding {
                        anyhow::bail!("Unknown provider: 'embedding'. Must be groq or gemini.");
                    }
                    store.set_setting(AI_PROVIDER_SETTING, tag.as_str()).await?;
                    println!("Active provider set to {}.", tag);
                }
            }
        }
    }

    Ok(())
}
