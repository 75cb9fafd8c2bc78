//! Artifact generation — projecting the registry onto the OS.
//!
//! Two kinds of artifacts are generated, both functions of the registry
//! alone (plus the systemd options carried sideband from the catalog):
//! systemd unit/timer files under `~/.config/systemd/user/`, and a
//! Caddy-compatible gateway config under `~/.castle/generated/`. Neither
//! references the source tree; a compiled node runs without the repo.

mod caddyfile;
mod systemd;

pub use caddyfile::{RemoteRoute, generate_caddyfile};
pub use systemd::{
    UNIT_PREFIX, cron_to_interval_sec, cron_to_oncalendar, generate_timer, generate_unit,
    timer_name, unit_name,
};

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::catalog::CastleConfig;
use crate::error::{CastleError, CastleResult};
use crate::home::CastleHome;
use crate::manifest::SystemdSpec;
use crate::registry::NodeRegistry;

/// Look up the sideband systemd options for a deployed component.
#[must_use]
pub fn systemd_spec_for<'a>(
    config: Option<&'a CastleConfig>,
    name: &str,
) -> Option<&'a SystemdSpec> {
    let config = config?;
    let manage = config
        .services
        .get(name)
        .and_then(|s| s.manage.as_ref())
        .or_else(|| config.jobs.get(name).and_then(|j| j.manage.as_ref()))?;
    manage.systemd.as_ref()
}

/// Write a file only when its content changed. Returns whether a write
/// happened.
fn write_if_changed(path: &Path, content: &str) -> CastleResult<bool> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == content {
            debug!(path = %path.display(), "unchanged, skipping write");
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CastleError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| CastleError::io(path, e))?;
    Ok(true)
}

/// Write service units (and timers for scheduled components) for every
/// managed deployment. Returns the unit file names written or refreshed.
///
/// `config` supplies the sideband systemd options when the catalog is
/// available on this node; `home_dir` feeds the unit `PATH=` line.
///
/// # Errors
///
/// Returns an error (with the failing path) on any write failure.
pub fn write_unit_files(
    registry: &NodeRegistry,
    config: Option<&CastleConfig>,
    unit_dir: &Path,
    home_dir: &Path,
) -> CastleResult<Vec<String>> {
    std::fs::create_dir_all(unit_dir).map_err(|e| CastleError::io(unit_dir, e))?;

    let mut written = Vec::new();
    for (name, deployed) in &registry.deployed {
        if !deployed.managed {
            continue;
        }
        let sd = systemd_spec_for(config, name);

        let unit = unit_name(name);
        let content = generate_unit(name, deployed, sd, home_dir);
        write_if_changed(&unit_dir.join(&unit), &content)?;
        written.push(unit);

        if let Some(schedule) = &deployed.schedule {
            let timer = timer_name(name);
            let content = generate_timer(name, deployed.description.as_deref(), schedule);
            write_if_changed(&unit_dir.join(&timer), &content)?;
            written.push(timer);
        }
    }

    info!(units = written.len(), dir = %unit_dir.display(), "wrote systemd units");
    Ok(written)
}

/// Generate and write the gateway Caddyfile.
///
/// # Errors
///
/// Returns an error (with the failing path) on any write failure.
pub fn write_caddyfile(
    registry: &NodeRegistry,
    remote_routes: &[RemoteRoute],
    home: &CastleHome,
) -> CastleResult<()> {
    let content = generate_caddyfile(
        registry,
        remote_routes,
        &home.static_bundle_dir("castle-app"),
        &home.generated_dir(),
    );
    let path = home.caddyfile_path();
    write_if_changed(&path, &content)?;
    info!(path = %path.display(), "wrote gateway config");
    Ok(())
}

/// Ask the systemd user instance to pick up changed unit files.
///
/// # Errors
///
/// Returns an error if `systemctl` cannot be spawned; a non-zero exit is
/// logged but not fatal — the next explicit service action will surface it.
pub fn daemon_reload() -> std::io::Result<()> {
    let status = Command::new("systemctl")
        .args(["--user", "daemon-reload"])
        .status()?;
    if !status.success() {
        tracing::warn!(%status, "systemctl --user daemon-reload failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use indexmap::IndexMap;

    use super::*;
    use crate::registry::{Behavior, DeployedComponent, NodeConfig, Runner};

    fn daemon(port: u16) -> DeployedComponent {
        DeployedComponent {
            runner: Runner::Python,
            run_cmd: vec!["/usr/local/bin/svc".into()],
            env: IndexMap::new(),
            description: None,
            behavior: Behavior::Daemon,
            stack: None,
            port: Some(port),
            health_path: None,
            proxy_path: None,
            schedule: None,
            managed: true,
        }
    }

    fn registry(deployed: IndexMap<String, DeployedComponent>) -> NodeRegistry {
        NodeRegistry {
            node: NodeConfig {
                hostname: "keep".into(),
                castle_root: None,
                gateway_port: 9000,
            },
            deployed,
        }
    }

    #[test]
    fn test_write_unit_files_managed_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut deployed = IndexMap::new();
        deployed.insert("svc".to_owned(), daemon(9001));
        let mut unmanaged = daemon(9002);
        unmanaged.managed = false;
        deployed.insert("loose".to_owned(), unmanaged);
        let mut job = daemon(0);
        job.port = None;
        job.schedule = Some("0 2 * * *".into());
        job.behavior = Behavior::Tool;
        deployed.insert("backup".to_owned(), job);

        let written = write_unit_files(
            &registry(deployed),
            None,
            dir.path(),
            &PathBuf::from("/home/test"),
        )
        .unwrap();

        assert!(written.contains(&"castle-svc.service".to_owned()));
        assert!(written.contains(&"castle-backup.service".to_owned()));
        assert!(written.contains(&"castle-backup.timer".to_owned()));
        assert!(!written.iter().any(|u| u.contains("loose")));
        assert!(dir.path().join("castle-svc.service").is_file());
        assert!(dir.path().join("castle-backup.timer").is_file());
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut deployed = IndexMap::new();
        deployed.insert("svc".to_owned(), daemon(9001));
        let reg = registry(deployed);

        write_unit_files(&reg, None, dir.path(), &PathBuf::from("/home/test")).unwrap();
        let path = dir.path().join("castle-svc.service");
        let first_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        write_unit_files(&reg, None, dir.path(), &PathBuf::from("/home/test")).unwrap();
        let second_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first_mtime, second_mtime);
    }

    #[test]
    fn test_systemd_spec_for_prefers_services() {
        let doc = "\
services:
  svc:
    run: {runner: python, tool: svc}
    manage:
      systemd:
        restart_sec: 10
";
        let config = crate::catalog::CastleConfig::parse(std::path::Path::new("/repo"), doc)
            .unwrap();
        let sd = systemd_spec_for(Some(&config), "svc").unwrap();
        assert_eq!(sd.restart_sec, 10);
        assert!(systemd_spec_for(Some(&config), "ghost").is_none());
        assert!(systemd_spec_for(None, "svc").is_none());
    }
}
