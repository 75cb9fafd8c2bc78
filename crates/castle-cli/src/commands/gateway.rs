//! `castle gateway` — manage the Caddy reverse proxy.

use std::process::Command;

use anyhow::{Result, bail};
use clap::Subcommand;

use castle_core::generators::{generate_caddyfile, write_caddyfile};

use crate::commands::{castle_home, load_node_registry};

/// Gateway actions.
#[derive(Subcommand)]
pub enum GatewayAction {
    /// Generate config and start Caddy.
    Start {
        /// Print the generated config without applying it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Stop Caddy.
    Stop,
    /// Regenerate config and reload Caddy.
    Reload {
        /// Print the generated config without applying it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show whether Caddy answers on the gateway port.
    Status,
}

pub fn run(action: &GatewayAction) -> Result<()> {
    match action {
        GatewayAction::Start { dry_run } => {
            if *dry_run {
                return dry_run_print();
            }
            regenerate()?;
            caddy(&["start"])
        },
        GatewayAction::Stop => caddy_plain(&["stop"]),
        GatewayAction::Reload { dry_run } => {
            if *dry_run {
                return dry_run_print();
            }
            regenerate()?;
            caddy(&["reload"])
        },
        GatewayAction::Status => status(),
    }
}

fn regenerate() -> Result<()> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;
    write_caddyfile(&registry, &[], &home)?;
    println!("  Generated {}", home.caddyfile_path().display());
    Ok(())
}

fn dry_run_print() -> Result<()> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;
    println!("# Caddyfile");
    println!(
        "{}",
        generate_caddyfile(
            &registry,
            &[],
            &home.static_bundle_dir("castle-app"),
            &home.generated_dir(),
        )
    );
    Ok(())
}

/// Run a caddy subcommand against the generated config.
fn caddy(args: &[&str]) -> Result<()> {
    let home = castle_home()?;
    let caddyfile = home.caddyfile_path();
    let status = Command::new("caddy")
        .args(args)
        .arg("--config")
        .arg(&caddyfile)
        .args(["--adapter", "caddyfile"])
        .status()?;
    if !status.success() {
        bail!("caddy {} failed ({status})", args.join(" "));
    }
    Ok(())
}

/// Run a caddy subcommand that takes no config argument.
fn caddy_plain(args: &[&str]) -> Result<()> {
    let status = Command::new("caddy").args(args).status()?;
    if !status.success() {
        bail!("caddy {} failed ({status})", args.join(" "));
    }
    Ok(())
}

fn status() -> Result<()> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;
    let port = registry.node.gateway_port;

    match std::net::TcpStream::connect(("127.0.0.1", port)) {
        Ok(_) => println!("gateway: listening on :{port}"),
        Err(_) => println!("gateway: not listening on :{port}"),
    }
    Ok(())
}
