//! CLI subcommand implementations.

pub mod deploy;
pub mod gateway;
pub mod info;
pub mod list;
pub mod logs;
pub mod secret;
pub mod service;

use std::path::PathBuf;

use anyhow::{Context, Result};

use castle_core::registry::{NodeRegistry, load_registry};
use castle_core::{CastleConfig, CastleHome, find_castle_root};

/// Load the catalog from the detected repo root.
pub(crate) fn load_catalog() -> Result<CastleConfig> {
    let root = find_castle_root()?;
    Ok(CastleConfig::load(&root)?)
}

/// Resolve the castle home, creating its directory skeleton.
pub(crate) fn castle_home() -> Result<CastleHome> {
    let home = CastleHome::resolve().context("resolving castle home")?;
    home.ensure().context("creating castle home directories")?;
    Ok(home)
}

/// Load the compiled registry, with a deploy hint when it is missing.
pub(crate) fn load_node_registry(home: &CastleHome) -> Result<NodeRegistry> {
    load_registry(&home.registry_path())
        .context("no registry found; run 'castle deploy' first")
}

/// The user's home directory (for unit `PATH=` lines).
pub(crate) fn user_home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .context("HOME environment variable is not set")
}
