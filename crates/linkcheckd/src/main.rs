//! linkcheckd — the linkcheck daemon.
//!
//! Single binary that assembles all linkcheck subsystems:
//! - State store (redb)
//! - URL probe (reqwest)
//! - Task queue + sub-job workers
//! - Retention sweeper
//! - REST API
//!
//! # Usage
//!
//! ```text
//! linkcheckd serve --config /etc/linkcheck.toml --port 8080 --data-dir /var/lib/linkcheck
//! linkcheckd show-key --data-dir /var/lib/linkcheck
//! ```

mod config;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,linkcheckd=debug,linkcheck=debug";

#[derive(Parser)]
#[command(name = "linkcheckd", about = "linkcheck daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server, task queue, and retention sweeper.
    Serve {
        /// Path to linkcheck.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the shared key clients must send in the Authorization header.
    ShowKey {
        /// Path to linkcheck.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref(), data_dir)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            serve::run_serve(config).await
        }
        Command::ShowKey { config, data_dir } => {
            let config = load_config(config.as_deref(), data_dir)?;
            let key = serve::shared_key(&config)?;
            println!("{key}");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Read the config file if given, then apply command-line overrides.
fn load_config(
    path: Option<&std::path::Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<DaemonConfig> {
    let mut config = match path {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(data_dir) = data_dir {
        config.store.data_dir = data_dir;
    }
    Ok(config)
}
