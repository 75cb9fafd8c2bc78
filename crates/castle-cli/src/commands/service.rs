//! `castle service` — drive systemd-managed deployments.

use std::process::Command;

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::Colorize;

use castle_core::generators::unit_name;

use crate::commands::{castle_home, load_node_registry};

/// Service control actions.
#[derive(Subcommand)]
pub enum ServiceAction {
    /// Start one service, or all managed services.
    Start {
        /// Component id.
        id: Option<String>,
    },
    /// Stop one service, or all managed services.
    Stop {
        /// Component id.
        id: Option<String>,
    },
    /// Restart one service, or all managed services.
    Restart {
        /// Component id.
        id: Option<String>,
    },
    /// Show the active state of managed services.
    Status {
        /// Component id.
        id: Option<String>,
    },
}

pub fn run(action: &ServiceAction) -> Result<()> {
    match action {
        ServiceAction::Start { id } => act("start", id.as_deref()),
        ServiceAction::Stop { id } => act("stop", id.as_deref()),
        ServiceAction::Restart { id } => act("restart", id.as_deref()),
        ServiceAction::Status { id } => status(id.as_deref()),
    }
}

/// Managed daemon ids from the registry (jobs are timer-driven and not
/// started by hand here).
fn managed_ids(target: Option<&str>) -> Result<Vec<String>> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;

    if let Some(target) = target {
        match registry.deployed.get(target) {
            Some(deployed) if deployed.managed => return Ok(vec![target.to_owned()]),
            Some(_) => bail!("'{target}' is not systemd-managed"),
            None => bail!("'{target}' is not deployed; run 'castle deploy' first"),
        }
    }

    Ok(registry
        .deployed
        .iter()
        .filter(|(_, d)| d.managed && d.schedule.is_none())
        .map(|(id, _)| id.clone())
        .collect())
}

fn act(action: &str, target: Option<&str>) -> Result<()> {
    let ids = managed_ids(target)?;
    if ids.is_empty() {
        println!("No managed services.");
        return Ok(());
    }

    let mut failed = 0;
    for id in &ids {
        let unit = unit_name(id);
        let output = Command::new("systemctl")
            .args(["--user", action, &unit])
            .output()?;
        if output.status.success() {
            println!("  {} {}", action, id.green());
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            println!("  {} {} — {}", action, id.red(), stderr.trim());
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} service(s) failed to {action}", ids.len());
    }
    Ok(())
}

fn status(target: Option<&str>) -> Result<()> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;

    let ids: Vec<String> = match target {
        Some(target) => vec![target.to_owned()],
        None => registry
            .deployed
            .iter()
            .filter(|(_, d)| d.managed)
            .map(|(id, _)| id.clone())
            .collect(),
    };

    for id in ids {
        let unit = unit_name(&id);
        let output = Command::new("systemctl")
            .args(["--user", "is-active", &unit])
            .output()?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let colored_state = match state.as_str() {
            "active" => state.green(),
            "failed" => state.red(),
            _ => state.yellow(),
        };
        println!("  {id:24} {colored_state}");
    }
    Ok(())
}
