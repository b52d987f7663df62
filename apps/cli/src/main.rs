//! Seedwatch - periodic torrent reconciliation daemon
//!
//! Runs the watch-folder importer, the queue & ratio reconciler and the feed
//! importer on their timers, or runs any one of them once.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use seedwatch_core::{SeedwatchCore, SettingsStore};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Seedwatch - torrent queue, ratio and import automation
#[derive(Parser)]
#[command(name = "seedwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for Seedwatch
    #[arg(long, env = "SEEDWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all jobs on their timers until Ctrl-C
    Run,

    /// Run one job once and print its report
    Tick {
        job: JobKind,
    },

    /// Feed subscriptions
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },

    /// Show stored transfers and the active queue
    Status,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum JobKind {
    Watch,
    Reconcile,
    Feeds,
}

#[derive(Subcommand)]
enum FeedAction {
    /// Subscribe to a feed
    Add {
        /// Feed URL
        url: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// List subscriptions
    List,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "seedwatch=debug" } else { "seedwatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Determine data directory
    let data_dir = cli
        .data_dir
        .unwrap_or_else(seedwatch_types::default_data_dir);
    tracing::debug!("Using data directory {}", data_dir.display());

    let settings = SettingsStore::new(data_dir.clone()).load().await?;
    let core = SeedwatchCore::open(&data_dir, settings).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run_daemon(&core).await?,

        Commands::Tick { job } => commands::tick(&core, job, cli.output).await?,

        Commands::Feed { action } => commands::feed_action(&core, action, cli.output).await?,

        Commands::Status => commands::show_status(&core, cli.output).await?,
    }

    Ok(())
}
