//! View models shared across endpoints.
//!
//! A [`ComponentSummary`] can be built from four sources: a deployed
//! registry entry, a catalog service/job spec (not yet deployed), a
//! catalog program, or a peer's mesh announcement. Deployed state wins
//! over catalog defaults when both exist for an id.

use std::path::Path;

use serde::Serialize;

use castle_core::generators::unit_name;
use castle_core::manifest::{JobSpec, ProgramSpec, ServiceSpec};
use castle_core::registry::{Behavior, DeployedComponent};
use castle_core::CastleConfig;
use castle_mesh::ComponentAnnouncement;

/// Where a managed component's unit lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemdInfo {
    /// Unit file name.
    pub unit_name: String,
    /// Unit file path (user instance directory).
    pub unit_path: String,
    /// Whether a timer drives the unit.
    pub timer: bool,
}

impl SystemdInfo {
    fn for_component(id: &str, timer: bool) -> Self {
        let unit = unit_name(id);
        Self {
            unit_path: format!("~/.config/systemd/user/{unit}"),
            unit_name: unit,
            timer,
        }
    }
}

/// One row of the dashboard listings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentSummary {
    /// Component id.
    pub id: String,
    /// Human description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `service`, `job`, `tool`, `frontend`, or `program`.
    pub category: String,
    /// `daemon` or `tool`, for deployed entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    /// Scaffold stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Runner kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    /// Internal HTTP port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Health endpoint path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    /// Gateway route prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_path: Option<String>,
    /// Whether systemd owns the lifecycle.
    pub managed: bool,
    /// Unit details, when managed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub systemd: Option<SystemdInfo>,
    /// Cron schedule, for jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Source directory relative to the catalog root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Tool version, for programs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// System packages a tool needs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_dependencies: Vec<String>,
    /// Whether a tool resolves on PATH right now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,
    /// Hostname of the owning node, for cross-node listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// A summary plus the raw manifest behind it.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentDetail {
    /// The summary fields.
    #[serde(flatten)]
    pub summary: ComponentSummary,
    /// The raw registry entry or catalog spec.
    pub manifest: serde_json::Value,
}

impl ComponentSummary {
    /// Build from a deployed registry entry.
    #[must_use]
    pub fn from_deployed(id: &str, deployed: &DeployedComponent, node: Option<&str>) -> Self {
        let category = if deployed.schedule.is_some() {
            "job"
        } else {
            "service"
        };
        let systemd = deployed
            .managed
            .then(|| SystemdInfo::for_component(id, deployed.schedule.is_some()));
        let installed = (deployed.behavior == Behavior::Tool && deployed.schedule.is_none())
            .then(|| which::which(id).is_ok());

        Self {
            id: id.to_owned(),
            description: deployed.description.clone(),
            category: category.to_owned(),
            behavior: Some(deployed.behavior.to_string()),
            stack: deployed.stack.clone(),
            runner: Some(deployed.runner.to_string()),
            port: deployed.port,
            health_path: deployed.health_path.clone(),
            proxy_path: deployed.proxy_path.clone(),
            managed: deployed.managed,
            systemd,
            schedule: deployed.schedule.clone(),
            installed,
            node: node.map(str::to_owned),
            ..Self::default()
        }
    }

    /// Build from a catalog service spec (not deployed here).
    #[must_use]
    pub fn from_service(id: &str, svc: &ServiceSpec, config: &CastleConfig) -> Self {
        let managed = svc.is_managed();
        Self {
            id: id.to_owned(),
            description: config
                .resolve_description(svc.description.as_deref(), svc.component.as_deref())
                .map(str::to_owned),
            category: "service".to_owned(),
            stack: config
                .resolve_stack(svc.component.as_deref())
                .map(str::to_owned),
            runner: Some(svc.run.runner().to_string()),
            port: svc.internal_port(),
            health_path: svc.health_path().map(str::to_owned),
            proxy_path: svc.proxy_path(id),
            managed,
            systemd: managed.then(|| SystemdInfo::for_component(id, false)),
            source: svc
                .component
                .as_deref()
                .and_then(|c| config.programs.get(c))
                .and_then(|p| p.source.clone()),
            ..Self::default()
        }
    }

    /// Build from a catalog job spec (not deployed here).
    #[must_use]
    pub fn from_job(id: &str, job: &JobSpec, config: &CastleConfig) -> Self {
        Self {
            id: id.to_owned(),
            description: config
                .resolve_description(job.description.as_deref(), job.component.as_deref())
                .map(str::to_owned),
            category: "job".to_owned(),
            stack: config
                .resolve_stack(job.component.as_deref())
                .map(str::to_owned),
            runner: Some(job.run.runner().to_string()),
            managed: true,
            systemd: Some(SystemdInfo::for_component(id, true)),
            schedule: Some(job.schedule.clone()),
            source: job
                .component
                .as_deref()
                .and_then(|c| config.programs.get(c))
                .and_then(|p| p.source.clone()),
            ..Self::default()
        }
    }

    /// Build from a catalog program (tools and frontends).
    #[must_use]
    pub fn from_program(id: &str, program: &ProgramSpec, root: &Path) -> Self {
        let category = if program.is_tool() {
            "tool"
        } else if program.is_frontend() {
            "frontend"
        } else {
            "program"
        };

        // Infer the runner from the source tree when possible.
        let runner = program.source_dir().and_then(|source| {
            let source_dir = root.join(source);
            if source_dir.join("pyproject.toml").is_file() {
                Some("python".to_owned())
            } else if source_dir.is_file() {
                Some("command".to_owned())
            } else {
                None
            }
        });

        let installed = program
            .install
            .as_ref()
            .and_then(|i| i.path.as_ref())
            .map(|path| which::which(path.alias.as_deref().unwrap_or(id)).is_ok());

        Self {
            id: id.to_owned(),
            description: program.description.clone(),
            category: category.to_owned(),
            stack: program.stack.clone(),
            runner,
            managed: false,
            source: program.source.clone(),
            version: program.tool.as_ref().map(|t| t.version.clone()),
            system_dependencies: program
                .tool
                .as_ref()
                .map(|t| t.system_dependencies.clone())
                .unwrap_or_default(),
            installed,
            ..Self::default()
        }
    }

    /// Build from a peer's mesh announcement.
    #[must_use]
    pub fn from_announcement(id: &str, component: &ComponentAnnouncement, node: &str) -> Self {
        let category = if component.schedule.is_some() {
            "job"
        } else {
            "service"
        };
        Self {
            id: id.to_owned(),
            description: component.description.clone(),
            category: category.to_owned(),
            behavior: Some(component.behavior.clone()),
            stack: component.stack.clone(),
            runner: Some(component.runner.clone()),
            port: component.port,
            health_path: component.health_path.clone(),
            proxy_path: component.proxy_path.clone(),
            managed: component.managed,
            schedule: component.schedule.clone(),
            node: Some(node.to_owned()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use castle_core::registry::Runner;

    fn deployed_daemon() -> DeployedComponent {
        DeployedComponent {
            runner: Runner::Python,
            run_cmd: vec!["api".into()],
            env: IndexMap::new(),
            description: Some("api".into()),
            behavior: Behavior::Daemon,
            stack: Some("python-fastapi".into()),
            port: Some(9001),
            health_path: Some("/health".into()),
            proxy_path: Some("/api".into()),
            schedule: None,
            managed: true,
        }
    }

    #[test]
    fn test_deployed_daemon_summary() {
        let summary = ComponentSummary::from_deployed("api", &deployed_daemon(), None);
        assert_eq!(summary.category, "service");
        assert_eq!(summary.behavior.as_deref(), Some("daemon"));
        assert_eq!(summary.port, Some(9001));
        let systemd = summary.systemd.unwrap();
        assert_eq!(systemd.unit_name, "castle-api.service");
        assert!(!systemd.timer);
    }

    #[test]
    fn test_deployed_job_summary_has_timer() {
        let mut job = deployed_daemon();
        job.schedule = Some("0 2 * * *".into());
        job.behavior = Behavior::Tool;
        let summary = ComponentSummary::from_deployed("backup", &job, None);
        assert_eq!(summary.category, "job");
        assert!(summary.systemd.unwrap().timer);
        assert_eq!(summary.schedule.as_deref(), Some("0 2 * * *"));
    }

    #[test]
    fn test_program_summary_categories() {
        let tool: ProgramSpec = serde_yaml::from_str("tool: {version: 2.0.0}").unwrap();
        let summary = ComponentSummary::from_program("mytool", &tool, Path::new("/repo"));
        assert_eq!(summary.category, "tool");
        assert_eq!(summary.version.as_deref(), Some("2.0.0"));

        let frontend: ProgramSpec =
            serde_yaml::from_str("build: {outputs: [dist]}").unwrap();
        let summary = ComponentSummary::from_program("app", &frontend, Path::new("/repo"));
        assert_eq!(summary.category, "frontend");

        let plain: ProgramSpec = serde_yaml::from_str("description: lib").unwrap();
        let summary = ComponentSummary::from_program("lib", &plain, Path::new("/repo"));
        assert_eq!(summary.category, "program");
    }

    #[test]
    fn test_summary_serialization_skips_absent_fields() {
        let summary = ComponentSummary::from_deployed("api", &deployed_daemon(), None);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("version").is_none());
        assert!(json.get("node").is_none());
        assert_eq!(json["proxy_path"], "/api");
    }
}
