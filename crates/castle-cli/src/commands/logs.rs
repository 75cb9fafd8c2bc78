//! `castle logs` — journal passthrough for managed components.

use std::process::Command;

use anyhow::{Result, bail};

use castle_core::generators::unit_name;

use crate::commands::{castle_home, load_node_registry};

pub fn run(id: &str, lines: u32, follow: bool) -> Result<()> {
    let home = castle_home()?;
    let registry = load_node_registry(&home)?;
    if !registry.deployed.get(id).is_some_and(|d| d.managed) {
        bail!("'{id}' is not a managed service");
    }

    let unit = unit_name(id);
    let mut command = Command::new("journalctl");
    command.args(["--user", "-u", &unit, "-n", &lines.to_string(), "--no-pager"]);
    if follow {
        command.arg("-f");
    }

    // Inherit stdio so output streams straight through; ctrl-c ends a
    // follow the same way it ends journalctl.
    let status = command.status()?;
    if !status.success() && !follow {
        bail!("journalctl exited with {status}");
    }
    Ok(())
}
