//! groupsync - keep local groups in step with directory groups
//!
//! - `groupsync sync` creates and updates local groups from the directory
//! - `groupsync prune` deletes synced groups whose directory group is gone
//!
//! Both commands are dry-runs unless `--confirm` is given.

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use groupsync_cli::commands;
use groupsync_cli::error::CliResult;

/// groupsync - Directory group synchronization
#[derive(Parser)]
#[command(name = "groupsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync directory groups into the local group store
    Sync(commands::sync::SyncArgs),

    /// Delete synced groups whose directory group no longer exists
    Prune(commands::prune::PruneArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        e.print();
        std::process::exit(e.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> CliResult<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing groups already in progress");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Sync(args) => commands::sync::execute(args, cancel).await,
        Commands::Prune(args) => commands::prune::execute(args, cancel).await,
    }
}
