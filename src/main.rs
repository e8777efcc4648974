//! # DBNinja CLI (`dbninja`)
//!
//! ## Usage
//!
//! ```bash
//! dbninja --config ./config/dbninja.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dbninja ingest` | Introspect the target database and index its schema |
//! | `dbninja query "<question>"` | Generate and validate SQL for a question |
//! | `dbninja retrieve "<query>"` | Show the hybrid ranking without generating SQL |
//! | `dbninja serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! dbninja ingest
//! dbninja query "How many trades are active?" --dialect mysql
//! dbninja query "average quote price per instrument" --json
//! dbninja retrieve "trade status" --limit 5
//! RUST_LOG=debug dbninja serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dbninja::config::load_config;
use dbninja::{ingest, query, server};

/// DBNinja: natural-language questions to validated SQL over a hybrid
/// schema index.
#[derive(Parser)]
#[command(name = "dbninja", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dbninja.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect the target database and index tables, columns and examples.
    Ingest,

    /// Answer a question with SQL, validated by a dry run.
    Query {
        question: String,

        /// Target SQL dialect (defaults to `[generation].dialect`).
        #[arg(long)]
        dialect: Option<String>,

        /// Number of ranked candidates passed as context.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full answer (candidates, attempts) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank schema documents for a query without generating SQL.
    Retrieve {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest => {
            let summary = ingest::run_ingest(&config).await?;
            println!("ingest");
            println!("  tables: {}", summary.tables);
            println!("  columns: {}", summary.columns);
            println!("  examples: {}", summary.examples);
            println!("  failed batches: {}", summary.failed_batches);
            println!("ok");
        }
        Commands::Query {
            question,
            dialect,
            top_k,
            json,
        } => {
            query::run_query(&config, &question, dialect.as_deref(), top_k, json).await?;
        }
        Commands::Retrieve { query: q, limit } => {
            query::run_retrieve(&config, &q, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}
