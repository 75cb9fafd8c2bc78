//! `castle` — CLI for the Castle workload orchestrator.
//!
//! Bridges the declarative catalog (`castle.yaml`) to runtime state under
//! `~/.castle/` and drives the systemd user instance for the deployments
//! it manages.

#![deny(unsafe_code)]
#![warn(clippy::all)]

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Castle — declarative orchestration for personal infrastructure.
#[derive(Parser)]
#[command(name = "castle")]
#[command(author, version, about = "Deploy and manage castle components")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile the catalog and write registry, units, and gateway config.
    Deploy {
        /// Deploy a single component instead of everything.
        component: Option<String>,
    },
    /// List catalog entries and their deployment state.
    List,
    /// Show detailed info for one entry.
    Info {
        /// Entry id.
        id: String,
    },
    /// Control systemd-managed services.
    Service {
        #[command(subcommand)]
        action: commands::service::ServiceAction,
    },
    /// Manage the Caddy gateway.
    Gateway {
        #[command(subcommand)]
        action: commands::gateway::GatewayAction,
    },
    /// Tail journal logs for a managed component.
    Logs {
        /// Component id.
        id: String,
        /// Number of lines.
        #[arg(short = 'n', long = "lines", default_value_t = 100)]
        lines: u32,
        /// Follow new output.
        #[arg(short, long)]
        follow: bool,
    },
    /// Manage secrets under ~/.castle/secrets/.
    Secret {
        #[command(subcommand)]
        action: commands::secret::SecretAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Deploy { component } => commands::deploy::run(component.as_deref()),
        Command::List => commands::list::run(),
        Command::Info { id } => commands::info::run(&id),
        Command::Service { action } => commands::service::run(&action),
        Command::Gateway { action } => commands::gateway::run(&action),
        Command::Logs { id, lines, follow } => commands::logs::run(&id, lines, follow),
        Command::Secret { action } => commands::secret::run(&action),
    }
}
