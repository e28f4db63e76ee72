use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use piledriver::config;
use piledriver::daemon::Daemon;
use piledriver::remote::RemoteStore;
use piledriver::remote::drive::DriveStore;

#[derive(Debug, Parser)]
#[command(name = "piledriver", about = "Continuously mirror local directories to a remote cloud store")]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile every configured directory against the remote, then watch
    /// and mirror changes until interrupted.
    Run,
    /// Inspect stored remote credentials.
    Auth {
        #[command(subcommand)]
        subcommand: AuthCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    /// Report whether the daemon currently has usable remote credentials.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.subcommand {
        Command::Run => run().await,
        Command::Auth { subcommand: AuthCommand::Status } => auth_status(),
    }
}

async fn run() -> Result<()> {
    let cfg = config::load().context("Couldn't load configuration")?;
    let token_path = cfg.token_path().context("Couldn't determine credential path")?;
    let store: Arc<dyn RemoteStore> = Arc::new(DriveStore::new(token_path));

    let daemon = Daemon::start(&cfg, store).await.context("Couldn't start daemon")?;

    tokio::select! {
        result = daemon.join() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            Ok(())
        }
    }
}

fn auth_status() -> Result<()> {
    let cfg = config::load().context("Couldn't load configuration")?;
    let token_path = cfg.token_path().context("Couldn't determine credential path")?;
    let store = DriveStore::new(token_path);

    match store.find_by_name("piledriver-probe-only") {
        Ok(_) => {
            println!("authenticated");
            Ok(())
        }
        Err(e) => {
            println!("not authenticated: {e}");
            Ok(())
        }
    }
}

/// Maps `-v` occurrences the same way the old `simplelog`-based CLI did,
/// adapted to `tracing-subscriber`'s `EnvFilter`. `RUST_LOG`, if set, wins.
fn init_logger(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
