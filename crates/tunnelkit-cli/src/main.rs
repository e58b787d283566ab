//! tunnelkit CLI - profile management, tunnel daemon and observers
//!
//! Provides `tunnelkit profile`, `tunnelkit daemon`, `tunnelkit status` and
//! the administrative commands sent to a running daemon.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use commands::admin::AdminCommand;
use commands::profile::ProfileCommands;

#[derive(Parser)]
#[command(name = "tunnelkit")]
#[command(about = "tunnelkit - tunnel profile manager and control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
    /// Refresh every auto-updating remote profile once
    Refresh,
    /// Run the tunnel process in the foreground
    Daemon,
    /// Stream status snapshots from the running daemon
    Status {
        /// Snapshot cadence in milliseconds (defaults to the daemon's)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Stream log lines from the running daemon
    Logs,
    /// Restart the tunnel with the selected profile
    Reload,
    /// Stop the tunnel; the daemon keeps serving commands
    Stop,
    /// Drop the tunnel's open connections
    CloseConnections,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Daemon) {
        "info"
    } else {
        "warn"
    };
    init_tracing(default_level);

    let result = match cli.command {
        Commands::Profile { action } => commands::profile::execute(action).await,
        Commands::Refresh => commands::profile::refresh().await,
        Commands::Daemon => commands::daemon::run().await.map_err(Into::into),
        Commands::Status { interval_ms } => commands::observe::status(interval_ms).await,
        Commands::Logs => commands::observe::logs().await,
        Commands::Reload => commands::admin::execute(AdminCommand::Reload).await,
        Commands::Stop => commands::admin::execute(AdminCommand::Stop).await,
        Commands::CloseConnections => {
            commands::admin::execute(AdminCommand::CloseConnections).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Log to stderr; `RUST_LOG` overrides `default_level`
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
