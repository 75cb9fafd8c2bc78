//! `castle info` — one entry, in full.

use anyhow::{Result, bail};
use colored::Colorize;

use crate::commands::{castle_home, load_catalog, load_node_registry};

pub fn run(id: &str) -> Result<()> {
    // Deployed state first: it reflects what actually runs here.
    if let Ok(home) = castle_home() {
        if let Ok(registry) = load_node_registry(&home) {
            if let Some(deployed) = registry.deployed.get(id) {
                println!("{} {}", id.bold(), "(deployed)".green());
                print!("{}", serde_yaml::to_string(deployed)?);
                return Ok(());
            }
        }
    }

    let config = load_catalog()?;
    if let Some(svc) = config.services.get(id) {
        println!("{} {}", id.bold(), "(service, not deployed)".yellow());
        print!("{}", serde_yaml::to_string(svc)?);
        return Ok(());
    }
    if let Some(job) = config.jobs.get(id) {
        println!("{} {}", id.bold(), "(job, not deployed)".yellow());
        print!("{}", serde_yaml::to_string(job)?);
        return Ok(());
    }
    if let Some(program) = config.programs.get(id) {
        println!("{} {}", id.bold(), "(program)".cyan());
        print!("{}", serde_yaml::to_string(program)?);
        return Ok(());
    }

    bail!("'{id}' not found in registry or castle.yaml");
}
