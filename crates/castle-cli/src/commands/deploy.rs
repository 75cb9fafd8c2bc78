//! `castle deploy` — bridge the catalog to runtime state.

use anyhow::Result;
use colored::Colorize;

use castle_core::generators::{daemon_reload, write_caddyfile, write_unit_files};
use castle_core::home::systemd_user_dir;
use castle_core::registry::{DeployedComponent, NodeConfig, save_registry};
use castle_core::{compile, compile_component, find_castle_root};

use crate::commands::{castle_home, user_home_dir};

pub fn run(component: Option<&str>) -> Result<()> {
    let root = find_castle_root()?;
    let config = castle_core::CastleConfig::load(&root)?;
    let home = castle_home()?;

    let node = NodeConfig::local(Some(root.display().to_string()), config.gateway.port);

    let registry = match component {
        Some(target) => compile_component(&config, node, &home, target)?,
        None => compile(&config, node, &home)?,
    };

    let mut deployed_count = 0;
    for (name, deployed) in &registry.deployed {
        if let Some(target) = component {
            if name != target {
                continue;
            }
        }
        print_deployed(name, deployed);
        deployed_count += 1;
    }

    save_registry(&registry, &home.registry_path())?;
    println!("\nRegistry written: {}", home.registry_path().display());

    let unit_dir = systemd_user_dir()?;
    let units = write_unit_files(&registry, Some(&config), &unit_dir, &user_home_dir()?)?;
    println!("Systemd units written: {} ({} files)", unit_dir.display(), units.len());

    // The CLI generates local routes only; the daemon folds in mesh
    // routes when it regenerates.
    write_caddyfile(&registry, &[], &home)?;
    println!("Caddyfile written: {}", home.caddyfile_path().display());

    daemon_reload()?;

    println!(
        "\nDeployed {} component(s).",
        deployed_count.to_string().green()
    );
    println!("Run 'castle service start' to start all services.");
    Ok(())
}

fn print_deployed(name: &str, deployed: &DeployedComponent) {
    let mut parts = vec![format!("  {}", name.bold())];
    if let Some(port) = deployed.port {
        parts.push(format!("port={port}"));
    }
    if let Some(schedule) = &deployed.schedule {
        parts.push(format!("schedule={schedule}"));
    }
    if let Some(proxy_path) = &deployed.proxy_path {
        parts.push(format!("proxy={proxy_path}"));
    }
    println!("{}", parts.join(" "));
}
