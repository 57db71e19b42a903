//! # inventory-sync CLI (`invsync`)
//!
//! ## Usage
//!
//! ```bash
//! invsync --config ./config/invsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `invsync init` | Create the index with its mapping |
//! | `invsync sources` | Probe OCS, the directory, and the index |
//! | `invsync sync` | Run one reconciliation cycle |
//! | `invsync run` | Run cycles on the configured interval until Ctrl-C |
//! | `invsync merge` | Merge exported files offline and print the documents |
//! | `invsync delete <name>` | Remove one document from the index |
//!
//! Secrets are read from the environment variables named by the
//! `password_env` keys. Logs go to stderr; set `RUST_LOG` to adjust.

use clap::{Parser, Subcommand};
use inventory_sync::config;
use inventory_sync::migrate;
use inventory_sync::report::{self, AdFormat};
use inventory_sync::sink_elastic;
use inventory_sync::sources;
use inventory_sync::sync;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// inventory-sync: reconcile OCS Inventory and Active Directory into
/// an Elasticsearch index.
#[derive(Parser)]
#[command(
    name = "invsync",
    about = "Reconcile OCS Inventory and Active Directory computers into Elasticsearch",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/invsync.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and its mapping. Safe to run repeatedly.
    Init,

    /// Probe each configured backend and print its health.
    Sources,

    /// Run a single reconciliation cycle.
    Sync {
        /// Pull and merge, then print what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run reconciliation cycles forever on `sync.interval_secs`.
    ///
    /// Fails immediately if the database or directory is unreachable at
    /// startup. Later cycle failures are logged and the loop continues.
    Run,

    /// Merge exported source files and print the merged documents as JSON.
    ///
    /// Touches no service; the config file is optional.
    Merge {
        /// OCS export: JSON array of records.
        #[arg(long)]
        ocs: PathBuf,

        /// Directory export file.
        #[arg(long)]
        ad: PathBuf,

        /// Layout of the directory export.
        #[arg(long, value_enum, default_value = "records")]
        ad_format: AdFormat,
    },

    /// Delete one document from the index by its raw computer name.
    Delete {
        /// Computer name exactly as stored in the index.
        name: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Commands that don't require config
    if let Commands::Merge { ocs, ad, ad_format } = &cli.command {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            config::Config::minimal()
        };
        report::run_merge(&cfg, ocs, ad, *ad_format)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            if migrate::run_migrations(&cfg).await? {
                println!("Index created successfully.");
            } else {
                println!("Index already exists.");
            }
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Sync { dry_run } => {
            sync::run_sync(&cfg, dry_run).await?;
        }
        Commands::Run => {
            sync::run_service(&cfg).await?;
        }
        Commands::Delete { name } => {
            sink_elastic::run_delete(&cfg, &name).await?;
        }
        Commands::Merge { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
