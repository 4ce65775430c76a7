//! tremote: connect to a Transmission-RPC compatible download daemon.
//!
//! Binds to a saved profile (or an ad-hoc host), waits for the daemon's
//! session properties, and prints its status or watches refreshes.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

/// tremote: remote download daemon client
#[derive(Parser)]
#[command(name = "tremote", version, about = "Remote session client for Transmission-RPC compatible daemons")]
struct Cli {
    /// Config file path (default: ~/.tremote/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Profile store path (default: ~/.tremote/profiles.json)
    #[arg(long = "store", global = true)]
    store: Option<PathBuf>,

    /// Saved profile id (default: the last used remote)
    #[arg(short = 'P', long = "profile", global = true)]
    profile: Option<String>,

    /// Connect to this host instead of a saved profile
    #[arg(short = 'H', long = "host", global = true)]
    host: Option<String>,

    /// Port used with --host
    #[arg(short, long, global = true, default_value_t = 9091)]
    port: u16,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind, wait for readiness and print the daemon's status
    Status {
        /// Seconds to wait for the session to become ready
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Stay connected and print speed and torrent list changes
    Watch {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// List saved profiles
    Profiles,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. RUST_LOG wins over the defaults below.
    let default_filter = if cli.verbose {
        "tremote=debug,tremote_cli=debug,tremote_client=debug,tremote_core=debug"
    } else {
        "tremote=warn,tremote_cli=warn,tremote_client=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .init();

    let target = commands::Target {
        config: cli.config,
        store: cli.store,
        profile: cli.profile,
        host: cli.host,
        port: cli.port,
    };

    let result = match cli.command {
        Command::Status { timeout } => commands::status::run(&target, timeout).await,
        Command::Watch { duration } => commands::watch::run(&target, duration).await,
        Command::Profiles => commands::profiles::run(&target),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("tremote: {e:#}");
        std::process::exit(1);
    }
}
