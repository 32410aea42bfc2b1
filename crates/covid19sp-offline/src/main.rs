//! Command-line host for the Covid19-SP offline cache.
//!
//! Provides commands for:
//! - Installing the configured cache version against the live site
//! - Serving single requests through the installed cache
//! - Inspecting cache generations and the precache manifest
//!
//! ## Usage
//!
//! ```bash
//! # Precache the manifest and drop older generations
//! covid19sp-offline --config offline.json install
//!
//! # Serve one page through the cache
//! covid19sp-offline fetch graficos/resumo.html --output resumo.html
//!
//! # Show what is stored
//! covid19sp-offline list
//!
//! # Advance the cache version after deploying new data
//! covid19sp-offline --config offline.json bump
//! ```

use std::path::PathBuf;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use covid19sp_common::{init_logging, LogConfig, LogFormat};
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "covid19sp-offline")]
#[command(about = "Offline cache for the Covid19-SP dashboard")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache storage directory (overrides the config file)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Worker scope URL (overrides the config file)
    #[arg(long, global = true)]
    scope: Option<Url>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured version and activate it
    Install,

    /// Serve one request through the installed cache
    Fetch {
        /// Path relative to the scope, or an absolute URL
        target: String,
        /// Write the response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List cache generations and their entries
    List,

    /// Print the resolved manifest URLs
    Manifest,

    /// Advance the cache version key in the config file
    Bump {
        /// Deployment date (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let Cli {
        config,
        storage,
        scope,
        command,
        ..
    } = cli;
    let load = || commands::load_config(config.as_deref(), storage.clone(), scope.clone());

    match command {
        Commands::Install => commands::install(load()?).await,
        Commands::Fetch { target, output } => commands::fetch(load()?, &target, output).await,
        Commands::List => commands::list(load()?).await,
        Commands::Manifest => commands::manifest(&load()?),
        Commands::Bump { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            commands::bump(config.as_deref(), date)
        }
    }
}
