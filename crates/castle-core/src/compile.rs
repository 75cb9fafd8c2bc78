//! Registry compilation — resolving catalog specs into deployed components.
//!
//! Compilation is a pure function of the catalog plus the node identity:
//! running it twice over the same inputs produces the same registry. For
//! each service and job it resolves the environment (conventions first,
//! then user defaults, then secret substitution), the command line
//! (binaries PATH-resolved), and the routing metadata the gateway and
//! health poller need.

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::catalog::CastleConfig;
use crate::error::{CastleError, CastleResult};
use crate::home::CastleHome;
use crate::manifest::{EnvMap, JobSpec, RunSpec, Runner, ServiceSpec};
use crate::registry::{Behavior, DeployedComponent, NodeConfig, NodeRegistry, load_registry};
use crate::secrets;

/// Root of the per-component data directory convention.
pub const DATA_ROOT: &str = "/data/castle";

/// Compile the full catalog into a fresh registry.
///
/// Also syncs the `castle-app` static bundle into the home directory so
/// the gateway can serve it without the source tree (see
/// [`sync_static_bundle`]).
///
/// # Errors
///
/// Returns an error if the static bundle copy fails; spec-level problems
/// are caught earlier, at catalog load.
pub fn compile(
    config: &CastleConfig,
    node: NodeConfig,
    home: &CastleHome,
) -> CastleResult<NodeRegistry> {
    let mut registry = NodeRegistry::new(node);

    for (name, svc) in &config.services {
        registry
            .deployed
            .insert(name.clone(), deployed_service(config, name, svc, home));
    }
    for (name, job) in &config.jobs {
        registry
            .deployed
            .insert(name.clone(), deployed_job(config, name, job, home));
    }

    sync_static_bundle(config, home)?;

    info!(deployed = registry.deployed.len(), "compiled registry");
    Ok(registry)
}

/// Compile a single component, preserving the rest of the existing
/// registry on disk (if any).
///
/// # Errors
///
/// [`CastleError::NotFound`] if `target` names neither a service nor a
/// job; otherwise as [`compile`].
pub fn compile_component(
    config: &CastleConfig,
    node: NodeConfig,
    home: &CastleHome,
    target: &str,
) -> CastleResult<NodeRegistry> {
    if !config.services.contains_key(target) && !config.jobs.contains_key(target) {
        return Err(CastleError::NotFound {
            kind: "component",
            name: target.to_owned(),
        });
    }

    let deployed = match load_registry(&home.registry_path()) {
        Ok(existing) => existing.deployed,
        Err(_) => IndexMap::new(),
    };
    let mut registry = NodeRegistry { node, deployed };

    if let Some(svc) = config.services.get(target) {
        registry
            .deployed
            .insert(target.to_owned(), deployed_service(config, target, svc, home));
    } else if let Some(job) = config.jobs.get(target) {
        registry
            .deployed
            .insert(target.to_owned(), deployed_job(config, target, job, home));
    }

    sync_static_bundle(config, home)?;
    Ok(registry)
}

/// Environment variable prefix for a component id:
/// `central-context` → `CENTRAL_CONTEXT`.
#[must_use]
pub fn env_prefix(id: &str) -> String {
    id.replace('-', "_").to_uppercase()
}

fn deployed_service(
    config: &CastleConfig,
    name: &str,
    svc: &ServiceSpec,
    home: &CastleHome,
) -> DeployedComponent {
    let prefix = env_prefix(name);
    let mut env = EnvMap::new();

    // A remote deployment has no local process to manage.
    let managed = svc.is_managed() && svc.run.runner() != Runner::Remote;
    if managed {
        env.insert(format!("{prefix}_DATA_DIR"), format!("{DATA_ROOT}/{name}"));
    }

    let port = svc.internal_port();
    if let Some(port) = port {
        env.insert(format!("{prefix}_PORT"), port.to_string());
    }

    // User defaults win over conventions.
    if let Some(defaults) = &svc.defaults {
        for (key, value) in &defaults.env {
            env.insert(key.clone(), value.clone());
        }
    }
    let env = secrets::resolve_env(&env, &home.secrets_dir());

    DeployedComponent {
        runner: svc.run.runner(),
        run_cmd: build_run_cmd(&svc.run, &env),
        env,
        description: config
            .resolve_description(svc.description.as_deref(), svc.component.as_deref())
            .map(str::to_owned),
        behavior: Behavior::Daemon,
        stack: config
            .resolve_stack(svc.component.as_deref())
            .map(str::to_owned),
        port,
        health_path: svc.health_path().map(str::to_owned),
        proxy_path: svc.proxy_path(name),
        schedule: None,
        managed,
    }
}

fn deployed_job(
    config: &CastleConfig,
    name: &str,
    job: &JobSpec,
    home: &CastleHome,
) -> DeployedComponent {
    let prefix = env_prefix(name);
    let mut env = EnvMap::new();
    env.insert(format!("{prefix}_DATA_DIR"), format!("{DATA_ROOT}/{name}"));

    if let Some(defaults) = &job.defaults {
        for (key, value) in &defaults.env {
            env.insert(key.clone(), value.clone());
        }
    }
    let env = secrets::resolve_env(&env, &home.secrets_dir());

    DeployedComponent {
        runner: job.run.runner(),
        run_cmd: build_run_cmd(&job.run, &env),
        env,
        description: config
            .resolve_description(job.description.as_deref(), job.component.as_deref())
            .map(str::to_owned),
        behavior: Behavior::Tool,
        stack: config
            .resolve_stack(job.component.as_deref())
            .map(str::to_owned),
        port: None,
        health_path: None,
        proxy_path: None,
        schedule: Some(job.schedule.clone()),
        managed: true,
    }
}

fn which_str(binary: &str) -> Option<String> {
    which::which(binary).ok().map(|p| p.display().to_string())
}

/// Build the resolved command line for a run spec.
///
/// `env` is the already-merged process environment; the container runner
/// folds it into `-e` flags alongside the container-scoped variables.
#[must_use]
pub fn build_run_cmd(run: &RunSpec, env: &EnvMap) -> Vec<String> {
    match run {
        RunSpec::Command { argv } => {
            let mut cmd = argv.clone();
            if let Some(first) = cmd.first_mut() {
                if let Some(resolved) = which_str(first) {
                    *first = resolved;
                }
            }
            cmd
        },
        RunSpec::Python { tool, args } => {
            let resolved = which_str(tool);
            if resolved.is_none() {
                warn!(tool = %tool, "tool not on PATH, leaving unresolved");
            }
            let mut cmd = vec![resolved.unwrap_or_else(|| tool.clone())];
            cmd.extend(args.iter().cloned());
            cmd
        },
        RunSpec::Container {
            image,
            command,
            args,
            ports,
            volumes,
            env: container_env,
            workdir,
        } => {
            let runtime = which_str("podman")
                .or_else(|| which_str("docker"))
                .unwrap_or_else(|| "docker".to_owned());
            let basename = image
                .rsplit('/')
                .next()
                .unwrap_or(image)
                .split(':')
                .next()
                .unwrap_or(image);

            let mut cmd = vec![
                runtime,
                "run".to_owned(),
                "--rm".to_owned(),
                format!("--name=castle-{basename}"),
            ];
            for (container_port, host_port) in ports {
                cmd.push("-p".to_owned());
                cmd.push(format!("{host_port}:{container_port}"));
            }
            for volume in volumes {
                cmd.push("-v".to_owned());
                cmd.push(volume.clone());
            }
            for (key, value) in container_env.iter().chain(env.iter()) {
                cmd.push("-e".to_owned());
                cmd.push(format!("{key}={value}"));
            }
            if let Some(workdir) = workdir {
                cmd.push("-w".to_owned());
                cmd.push(workdir.clone());
            }
            cmd.push(image.clone());
            if let Some(command) = command {
                cmd.extend(command.iter().cloned());
            }
            cmd.extend(args.iter().cloned());
            cmd
        },
        RunSpec::Node {
            script,
            package_manager,
            args,
        } => {
            let mut cmd = vec![
                package_manager.command().to_owned(),
                "run".to_owned(),
                script.clone(),
            ];
            cmd.extend(args.iter().cloned());
            cmd
        },
        // Remote deployments run elsewhere; nothing to exec locally.
        RunSpec::Remote { .. } => Vec::new(),
    }
}

/// Copy the `castle-app` frontend build outputs into
/// `~/.castle/static/castle-app/`, replacing any prior copy.
///
/// A no-op when the catalog has no `castle-app` program or it declares no
/// build outputs.
///
/// # Errors
///
/// Returns an error (with the failing path) if the copy fails.
pub fn sync_static_bundle(config: &CastleConfig, home: &CastleHome) -> CastleResult<()> {
    let Some(program) = config.programs.get("castle-app") else {
        return Ok(());
    };
    let Some(build) = &program.build else {
        return Ok(());
    };
    if build.outputs.is_empty() {
        return Ok(());
    }

    let source_dir = program.source_dir().unwrap_or("app");
    for output in &build.outputs {
        let src = config.root.join(source_dir).join(output);
        if !src.is_dir() {
            continue;
        }
        let dest = home.static_bundle_dir("castle-app");
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(|e| CastleError::io(&dest, e))?;
        }
        copy_dir_all(&src, &dest)?;
        info!(src = %src.display(), dest = %dest.display(), "synced static bundle");
    }
    Ok(())
}

fn copy_dir_all(src: &std::path::Path, dest: &std::path::Path) -> CastleResult<()> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map_or_else(|| src.to_path_buf(), std::path::Path::to_path_buf);
            CastleError::io(
                path,
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| std::path::Path::new(""));
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| CastleError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CastleError::io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| CastleError::io(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::registry::save_registry;

    const SAMPLE: &str = "\
gateway:
  port: 9000
programs:
  api:
    source: programs/api
    stack: python-fastapi
services:
  api:
    component: api
    run:
      runner: python
      tool: api
    expose:
      http:
        internal:
          port: 9001
        health_path: /health
    proxy:
      caddy:
        path_prefix: /api
    manage:
      systemd: {}
jobs:
  backup:
    run:
      runner: command
      argv: [backup]
    schedule: 0 2 * * *
";

    fn test_home() -> (tempfile::TempDir, CastleHome) {
        let dir = tempfile::tempdir().unwrap();
        let home = CastleHome::from_path(dir.path().join("castle"));
        home.ensure().unwrap();
        (dir, home)
    }

    fn node() -> NodeConfig {
        NodeConfig {
            hostname: "keep".into(),
            castle_root: None,
            gateway_port: 9000,
        }
    }

    #[test]
    fn test_single_daemon_compile() {
        let (_dir, home) = test_home();
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();

        let registry = compile(&config, node(), &home).unwrap();
        let api = &registry.deployed["api"];

        assert_eq!(api.runner, Runner::Python);
        assert_eq!(api.run_cmd.len(), 1);
        assert!(api.run_cmd[0].ends_with("api"));
        assert_eq!(api.env["API_DATA_DIR"], "/data/castle/api");
        assert_eq!(api.env["API_PORT"], "9001");
        assert_eq!(api.port, Some(9001));
        assert_eq!(api.health_path.as_deref(), Some("/health"));
        assert_eq!(api.proxy_path.as_deref(), Some("/api"));
        assert!(api.managed);
        assert_eq!(api.behavior, Behavior::Daemon);
        assert_eq!(api.stack.as_deref(), Some("python-fastapi"));
    }

    #[test]
    fn test_job_compile() {
        let (_dir, home) = test_home();
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();

        let registry = compile(&config, node(), &home).unwrap();
        let backup = &registry.deployed["backup"];

        assert_eq!(backup.behavior, Behavior::Tool);
        assert_eq!(backup.schedule.as_deref(), Some("0 2 * * *"));
        assert!(backup.managed);
        assert_eq!(backup.env["BACKUP_DATA_DIR"], "/data/castle/backup");
        assert_eq!(backup.port, None);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let (_dir, home) = test_home();
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();

        let first = compile(&config, node(), &home).unwrap();
        let second = compile(&config, node(), &home).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_secret_substitution_and_missing() {
        let (_dir, home) = test_home();
        std::fs::write(home.secrets_dir().join("API_KEY"), "xyz\n").unwrap();

        let doc = "\
services:
  s:
    run: {runner: python, tool: s}
    defaults:
      env:
        K: ${secret:API_KEY}
        Z: ${secret:NOPE}
";
        let config = CastleConfig::parse(Path::new("/repo"), doc).unwrap();
        let registry = compile(&config, node(), &home).unwrap();
        let s = &registry.deployed["s"];
        assert_eq!(s.env["K"], "xyz");
        assert_eq!(s.env["Z"], "<MISSING_SECRET:NOPE>");
    }

    #[test]
    fn test_defaults_env_overrides_conventions() {
        let (_dir, home) = test_home();
        let doc = "\
services:
  s:
    run: {runner: python, tool: s}
    expose: {http: {internal: {port: 9005}}}
    defaults:
      env:
        S_PORT: '7777'
";
        let config = CastleConfig::parse(Path::new("/repo"), doc).unwrap();
        let registry = compile(&config, node(), &home).unwrap();
        assert_eq!(registry.deployed["s"].env["S_PORT"], "7777");
    }

    #[test]
    fn test_unmanaged_service_has_no_data_dir() {
        let (_dir, home) = test_home();
        let doc = "\
services:
  s:
    run: {runner: python, tool: s}
    manage:
      systemd:
        enable: false
";
        let config = CastleConfig::parse(Path::new("/repo"), doc).unwrap();
        let registry = compile(&config, node(), &home).unwrap();
        let s = &registry.deployed["s"];
        assert!(!s.managed);
        assert!(!s.env.contains_key("S_DATA_DIR"));
    }

    #[test]
    fn test_remote_service_is_unmanaged_with_empty_cmd() {
        let (_dir, home) = test_home();
        let doc = "\
services:
  far:
    run: {runner: remote, base_url: 'http://other:9000'}
";
        let config = CastleConfig::parse(Path::new("/repo"), doc).unwrap();
        let registry = compile(&config, node(), &home).unwrap();
        let far = &registry.deployed["far"];
        assert!(!far.managed);
        assert!(far.run_cmd.is_empty());
        assert_eq!(far.runner, Runner::Remote);
    }

    #[test]
    fn test_container_run_cmd_shape() {
        let run: RunSpec = serde_yaml::from_str(
            "runner: container\nimage: docker.io/library/redis:7\nports:\n  6379: 16379\nvolumes: ['/data/redis:/data']\nenv:\n  INNER: a\nworkdir: /srv\n",
        )
        .unwrap();
        let process_env: EnvMap = [("OUTER".to_owned(), "b".to_owned())].into_iter().collect();
        let cmd = build_run_cmd(&run, &process_env);

        assert!(cmd[0].ends_with("docker") || cmd[0].ends_with("podman"));
        assert_eq!(cmd[1..4], ["run", "--rm", "--name=castle-redis"]);
        let joined = cmd.join(" ");
        assert!(joined.contains("-p 16379:6379"));
        assert!(joined.contains("-v /data/redis:/data"));
        assert!(joined.contains("-e INNER=a"));
        assert!(joined.contains("-e OUTER=b"));
        assert!(joined.contains("-w /srv"));
        assert!(joined.ends_with("docker.io/library/redis:7"));
    }

    #[test]
    fn test_node_run_cmd() {
        let run: RunSpec =
            serde_yaml::from_str("runner: node\nscript: start\nargs: ['--port', '3000']").unwrap();
        let cmd = build_run_cmd(&run, &EnvMap::new());
        assert_eq!(cmd, ["pnpm", "run", "start", "--port", "3000"]);
    }

    #[test]
    fn test_compile_component_scoped() {
        let (_dir, home) = test_home();
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();

        // Seed a full registry, then recompile only the job.
        let full = compile(&config, node(), &home).unwrap();
        save_registry(&full, &home.registry_path()).unwrap();

        let scoped = compile_component(&config, node(), &home, "backup").unwrap();
        assert!(scoped.deployed.contains_key("api"), "others preserved");
        assert!(scoped.deployed.contains_key("backup"));
    }

    #[test]
    fn test_compile_component_unknown_is_not_found() {
        let (_dir, home) = test_home();
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();
        let err = compile_component(&config, node(), &home, "ghost").unwrap_err();
        assert!(matches!(err, CastleError::NotFound { .. }));
    }

    #[test]
    fn test_static_bundle_sync() {
        let repo = tempfile::tempdir().unwrap();
        let (_dir, home) = test_home();

        let dist = repo.path().join("app").join("dist");
        std::fs::create_dir_all(dist.join("assets")).unwrap();
        std::fs::write(dist.join("index.html"), "<html></html>").unwrap();
        std::fs::write(dist.join("assets").join("main.js"), "1").unwrap();

        let doc = "\
programs:
  castle-app:
    source: app
    build:
      outputs: [dist]
";
        let config = CastleConfig::parse(repo.path(), doc).unwrap();
        compile(&config, node(), &home).unwrap();

        let bundle = home.static_bundle_dir("castle-app");
        assert!(bundle.join("index.html").is_file());
        assert!(bundle.join("assets").join("main.js").is_file());

        // A second compile replaces the prior copy.
        std::fs::write(dist.join("index.html"), "<html>v2</html>").unwrap();
        compile(&config, node(), &home).unwrap();
        let html = std::fs::read_to_string(bundle.join("index.html")).unwrap();
        assert_eq!(html, "<html>v2</html>");
    }
}
