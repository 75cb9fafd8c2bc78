//! `castle list` — catalog entries and their deployment state.

use anyhow::Result;
use colored::Colorize;

use crate::commands::{castle_home, load_catalog, load_node_registry};

pub fn run() -> Result<()> {
    let config = load_catalog()?;
    let registry = castle_home().and_then(|home| load_node_registry(&home)).ok();
    let deployed =
        |id: &str| -> bool { registry.as_ref().is_some_and(|r| r.deployed.contains_key(id)) };

    if !config.programs.is_empty() {
        println!("{}", "PROGRAMS".bold());
        for (id, program) in &config.programs {
            let mut notes = Vec::new();
            if let Some(stack) = &program.stack {
                notes.push(stack.clone());
            }
            if program.is_tool() {
                notes.push("tool".to_owned());
            }
            if program.is_frontend() {
                notes.push("frontend".to_owned());
            }
            println!(
                "  {:24} {}",
                id,
                notes.join(", ").dimmed()
            );
        }
        println!();
    }

    println!("{}", "SERVICES".bold());
    for (id, svc) in &config.services {
        let marker = if deployed(id) {
            "deployed".green()
        } else {
            "not deployed".yellow()
        };
        let port = svc
            .internal_port()
            .map_or(String::new(), |p| format!(":{p}"));
        println!("  {:24} {marker} {}", format!("{id}{port}"), describe(&config, id));
    }

    println!("\n{}", "JOBS".bold());
    for (id, job) in &config.jobs {
        let marker = if deployed(id) {
            "deployed".green()
        } else {
            "not deployed".yellow()
        };
        println!("  {:24} {marker} {}", format!("{id} [{}]", job.schedule), describe(&config, id));
    }

    Ok(())
}

fn describe(config: &castle_core::CastleConfig, id: &str) -> colored::ColoredString {
    let description = config
        .services
        .get(id)
        .and_then(|s| config.resolve_description(s.description.as_deref(), s.component.as_deref()))
        .or_else(|| {
            config.jobs.get(id).and_then(|j| {
                config.resolve_description(j.description.as_deref(), j.component.as_deref())
            })
        })
        .unwrap_or("");
    description.dimmed()
}
