//! # SDA CLI (`sda`)
//!
//! ## Usage
//!
//! ```bash
//! sda --config ./config/sda.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sda init` | Create the SQLite database, run migrations, seed the catalog |
//! | `sda serve` | Start the HTTP server |
//! | `sda client add <sub>` | Register a client |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sda::clients::ClientService;
use sda::store::MetadataStore;
use sda::{config, db, migrate, server};

/// SDA: source data, research contexts and conversations for a research
/// assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sda.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "sda", version, about = "Research-assistant content and conversation backend")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sda.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed the LLM / embedding catalogs.
    ///
    /// Idempotent: running it again only adds missing tables and catalog rows.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Manage clients.
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Register a client by its external `sub`. Prints the existing client
    /// if the sub is already known.
    Add {
        /// External subject identifier.
        sub: String,
    },
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
            server::run_server(&cfg).await?;
        }
        Commands::Client {
            action: ClientAction::Add { sub },
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;
            let clients = ClientService::new(MetadataStore::new(pool.clone()));
            let client = clients.register(&sub).await?;
            println!("client {} id={}", client.sub, client.id);
            pool.close().await;
        }
    }

    Ok(())
}
