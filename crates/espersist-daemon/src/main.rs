//! espersistd, the espersist persistence daemon
//!
//! One binary, three roles: the *manager* supervises a fleet of worker
//! processes, a *worker* drains one persistence queue into its configured
//! persister, and *stats* prints a dashboard over the queue counters.
//! Workers are respawned by the manager when they die; the manager itself
//! exits non-zero on configuration or database-setup failure.

mod manager;
mod stats;
mod worker;

use clap::{Parser, ValueEnum};
use espersist_core::{logging, Config};
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Supervise worker processes
    Manager,
    /// Drain one persistence queue
    Worker,
    /// Print the queue counter dashboard
    Stats,
}

#[derive(Parser)]
#[command(name = "espersistd")]
#[command(about = "SNMP telemetry persistence daemon")]
#[command(version)]
struct Cli {
    /// Role this process plays
    #[arg(long, value_enum, default_value = "manager")]
    role: Role,

    /// Queue to drain (worker role)
    #[arg(long = "queue", required_if_eq("role", "worker"))]
    queue: Option<String>,

    /// Worker ordinal within a multi-worker queue
    #[arg(long)]
    number: Option<usize>,

    /// Path to the configuration file
    #[arg(long = "config-file")]
    config_file: PathBuf,

    /// Force debug-level logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("espersistd: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(&config.syslog_priority, cli.debug) {
        eprintln!("espersistd: {e}");
        std::process::exit(1);
    }

    let outcome = match cli.role {
        Role::Manager => manager::run(&config, &cli.config_file, cli.debug).await,
        Role::Worker => {
            // clap enforces --queue for the worker role
            let qname = cli.queue.as_deref().unwrap_or_default();
            worker::run(&config, qname, cli.number).await
        }
        Role::Stats => stats::run(&config).await,
    };

    if let Err(e) = outcome {
        error!(role = ?cli.role, error = %e, "exiting on failure");
        std::process::exit(1);
    }
}
