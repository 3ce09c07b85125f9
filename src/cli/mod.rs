//! CLI parser and dispatch.

mod commands;
mod progress;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "etariff-harvest")]
#[command(about = "Batch harvester for eTariff XML exports")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./etariff-harvest.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the grid and download every discovered export (both phases)
    Harvest {
        /// Pagination safety bound (overrides config)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Per-item retry count (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Destination folder (overrides config)
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Show a progress bar during the download phase
        #[arg(short = 'P', long)]
        progress: bool,
    },

    /// Walk the grid only; persist ids and session for a later download
    Discover {
        /// Pagination safety bound (overrides config)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Where to write the discovered id list
        #[arg(long, default_value = "tariff-ids.txt")]
        ids_file: PathBuf,
        /// Where to write the captured session cookies
        #[arg(long, default_value = "session.json")]
        session_file: PathBuf,
    },

    /// Download exports for a previously discovered id list
    Download {
        /// Id list produced by the discover command
        #[arg(long, default_value = "tariff-ids.txt")]
        ids_file: PathBuf,
        /// Session file produced by the discover command
        #[arg(long, default_value = "session.json")]
        session_file: PathBuf,
        /// Per-item retry count (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Destination folder (overrides config)
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Show a progress bar
        #[arg(short = 'P', long)]
        progress: bool,
    },
}

/// Initialize logging, with an optional file layer from the config.
fn init_logging(log_file: Option<&Path>) {
    let default_filter = if is_verbose() {
        "etariff_harvest=info"
    } else {
        "etariff_harvest=warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match file {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
            .init(),
        None => registry.init(),
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    init_logging(settings.log_file.as_deref());

    match cli.command {
        Commands::Harvest {
            max_pages,
            max_retries,
            dest,
            progress,
        } => {
            apply_overrides(&mut settings, max_pages, max_retries, dest);
            commands::cmd_harvest(&settings, progress).await
        }
        Commands::Discover {
            max_pages,
            ids_file,
            session_file,
        } => {
            apply_overrides(&mut settings, max_pages, None, None);
            commands::cmd_discover(&settings, &ids_file, &session_file).await
        }
        Commands::Download {
            ids_file,
            session_file,
            max_retries,
            dest,
            progress,
        } => {
            apply_overrides(&mut settings, None, max_retries, dest);
            commands::cmd_download(&settings, &ids_file, &session_file, progress).await
        }
    }
}

fn apply_overrides(
    settings: &mut Settings,
    max_pages: Option<u32>,
    max_retries: Option<u32>,
    dest: Option<PathBuf>,
) {
    if let Some(pages) = max_pages {
        settings.max_pages = pages;
    }
    if let Some(retries) = max_retries {
        settings.max_retries = retries;
    }
    if let Some(dest) = dest {
        settings.dest_folder = dest;
    }
}
