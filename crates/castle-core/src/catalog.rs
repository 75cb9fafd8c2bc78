//! Catalog load, save, and cross-entity validation.
//!
//! The catalog (`castle.yaml`) has three top-level maps — `programs`,
//! `services`, `jobs` — plus a `gateway` scalar block. Entries are
//! validated individually so one malformed entry reports its own key path
//! without masking the rest; cross-entity rules (id collisions, port
//! collisions) run after all entries parse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::error::{CastleError, CastleResult};
use crate::manifest::{JobSpec, ProgramSpec, ServiceSpec, is_valid_id};

/// Gateway settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port the node-local reverse proxy listens on.
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
        }
    }
}

fn default_gateway_port() -> u16 {
    9000
}

/// The parsed catalog.
#[derive(Debug, Clone)]
pub struct CastleConfig {
    /// Catalog root directory (the directory containing `castle.yaml`).
    pub root: PathBuf,
    /// Gateway settings.
    pub gateway: GatewayConfig,
    /// Programs by id, in file order.
    pub programs: IndexMap<String, ProgramSpec>,
    /// Services by id, in file order.
    pub services: IndexMap<String, ServiceSpec>,
    /// Jobs by id, in file order.
    pub jobs: IndexMap<String, JobSpec>,
}

/// Per-entry validation report for a catalog document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Programs that parsed cleanly.
    pub program_count: usize,
    /// Services that parsed cleanly.
    pub service_count: usize,
    /// Jobs that parsed cleanly.
    pub job_count: usize,
    /// One message per offending key path.
    pub errors: Vec<String>,
}

/// Top-level document shape. Unknown top-level keys are tolerated;
/// per-entry schemas are strict.
#[derive(Debug, Default, Deserialize)]
struct RawDoc {
    #[serde(default)]
    gateway: GatewayConfig,
    #[serde(default, alias = "components")]
    programs: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    services: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    jobs: IndexMap<String, serde_yaml::Value>,
}

/// Serialized document shape: fixed section order, empty maps omitted.
#[derive(Serialize)]
struct CatalogOut<'a> {
    gateway: &'a GatewayConfig,
    #[serde(skip_serializing_if = "map_is_empty")]
    programs: &'a IndexMap<String, ProgramSpec>,
    #[serde(skip_serializing_if = "map_is_empty")]
    services: &'a IndexMap<String, ServiceSpec>,
    #[serde(skip_serializing_if = "map_is_empty")]
    jobs: &'a IndexMap<String, JobSpec>,
}

fn map_is_empty<T>(m: &&IndexMap<String, T>) -> bool {
    m.is_empty()
}

/// Find the catalog root by walking up from the current directory looking
/// for `castle.yaml`, falling back to the well-known `/data/repos/castle`.
///
/// # Errors
///
/// Returns [`CastleError::RepoUnavailable`] if no catalog is found.
pub fn find_castle_root() -> CastleResult<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let mut current = cwd.as_path();
        loop {
            if current.join("castle.yaml").is_file() {
                return Ok(current.to_path_buf());
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    let fallback = Path::new("/data/repos/castle");
    if fallback.join("castle.yaml").is_file() {
        return Ok(fallback.to_path_buf());
    }
    Err(CastleError::RepoUnavailable)
}

fn parse_entries<T: DeserializeOwned>(
    kind: &str,
    raw: IndexMap<String, serde_yaml::Value>,
    errors: &mut Vec<String>,
) -> IndexMap<String, T> {
    let mut parsed = IndexMap::new();
    for (name, value) in raw {
        if !is_valid_id(&name) {
            errors.push(format!("{kind}.{name}: invalid id"));
            continue;
        }
        match serde_yaml::from_value::<T>(value) {
            Ok(spec) => {
                parsed.insert(name, spec);
            },
            Err(e) => errors.push(format!("{kind}.{name}: {e}")),
        }
    }
    parsed
}

impl CastleConfig {
    /// An empty catalog rooted at `root`.
    #[must_use]
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gateway: GatewayConfig::default(),
            programs: IndexMap::new(),
            services: IndexMap::new(),
            jobs: IndexMap::new(),
        }
    }

    /// Path to `castle.yaml` under the catalog root.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("castle.yaml")
    }

    /// Load and validate the catalog under `root`.
    ///
    /// # Errors
    ///
    /// [`CastleError::RepoUnavailable`] if `castle.yaml` is missing,
    /// [`CastleError::InvalidCatalog`] on parse/schema/port errors,
    /// [`CastleError::DuplicateId`] on a cross-namespace id collision.
    pub fn load(root: &Path) -> CastleResult<Self> {
        let path = root.join("castle.yaml");
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CastleError::RepoUnavailable);
            },
            Err(e) => return Err(CastleError::io(path, e)),
        };
        let config = Self::parse(root, &text)?;
        debug!(
            path = %path.display(),
            programs = config.programs.len(),
            services = config.services.len(),
            jobs = config.jobs.len(),
            "loaded catalog"
        );
        Ok(config)
    }

    /// Parse and validate a catalog document against `root`.
    ///
    /// # Errors
    ///
    /// As for [`CastleConfig::load`], minus the I/O cases.
    pub fn parse(root: &Path, text: &str) -> CastleResult<Self> {
        let doc: RawDoc = serde_yaml::from_str(text).map_err(|e| CastleError::InvalidCatalog {
            errors: vec![e.to_string()],
        })?;

        let mut errors = Vec::new();
        let programs = parse_entries("programs", doc.programs, &mut errors);
        let services = parse_entries("services", doc.services, &mut errors);
        let jobs = parse_entries("jobs", doc.jobs, &mut errors);

        let config = Self {
            root: root.to_path_buf(),
            gateway: doc.gateway,
            programs,
            services,
            jobs,
        };

        if let Some(dup) = config.first_duplicate_id() {
            return Err(CastleError::DuplicateId(dup));
        }

        errors.extend(config.validate());
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(CastleError::InvalidCatalog { errors })
        }
    }

    /// Validate a catalog document entry by entry without constructing a
    /// config, reporting every offending key path.
    #[must_use]
    pub fn validate_document(text: &str) -> ValidationReport {
        let doc: RawDoc = match serde_yaml::from_str(text) {
            Ok(d) => d,
            Err(e) => {
                return ValidationReport {
                    errors: vec![e.to_string()],
                    ..ValidationReport::default()
                };
            },
        };

        let mut report = ValidationReport::default();
        let programs: IndexMap<String, ProgramSpec> =
            parse_entries("programs", doc.programs, &mut report.errors);
        let services: IndexMap<String, ServiceSpec> =
            parse_entries("services", doc.services, &mut report.errors);
        let jobs: IndexMap<String, JobSpec> =
            parse_entries("jobs", doc.jobs, &mut report.errors);
        report.program_count = programs.len();
        report.service_count = services.len();
        report.job_count = jobs.len();

        let config = Self {
            root: PathBuf::new(),
            gateway: doc.gateway,
            programs,
            services,
            jobs,
        };
        if let Some(dup) = config.first_duplicate_id() {
            report.errors.push(format!("duplicate id: {dup}"));
        }
        report.errors.extend(config.validate());
        report
    }

    /// Cross-entity validation: spec invariants and port collisions.
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, svc) in &self.services {
            if let Err(msg) = svc.validate() {
                errors.push(format!("services.{name}: {msg}"));
            }
        }
        for (name, job) in &self.jobs {
            if let Err(msg) = job.validate() {
                errors.push(format!("jobs.{name}: {msg}"));
            }
        }

        // Internal ports are unique per node; the gateway port is reserved.
        let mut claimed: HashMap<u16, &str> = HashMap::new();
        for (name, svc) in &self.services {
            let Some(port) = svc.internal_port() else {
                continue;
            };
            if port == self.gateway.port {
                errors.push(format!(
                    "services.{name}: port {port} is reserved for the gateway"
                ));
                continue;
            }
            if let Some(holder) = claimed.get(&port) {
                errors.push(format!(
                    "services.{name}: port {port} already used by service '{holder}'"
                ));
            } else {
                claimed.insert(port, name.as_str());
            }
        }

        errors
    }

    /// First id that appears in more than one of the three namespaces.
    fn first_duplicate_id(&self) -> Option<String> {
        for id in self.programs.keys() {
            if self.services.contains_key(id) || self.jobs.contains_key(id) {
                return Some(id.clone());
            }
        }
        self.services
            .keys()
            .find(|id| self.jobs.contains_key(*id))
            .cloned()
    }

    /// Whether an id exists in any of the three namespaces.
    #[must_use]
    pub fn contains_id(&self, id: &str) -> bool {
        self.programs.contains_key(id)
            || self.services.contains_key(id)
            || self.jobs.contains_key(id)
    }

    /// Save the catalog to `castle.yaml`, writing a `.yaml.bak` sibling of
    /// the current file first.
    ///
    /// Section order is fixed (`gateway`, `programs`, `services`, `jobs`);
    /// entries keep their insertion order; defaults are not emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup, serialization, or write fails.
    pub fn save(&self) -> CastleResult<()> {
        let path = self.config_path();
        if path.is_file() {
            let backup = path.with_extension("yaml.bak");
            std::fs::copy(&path, &backup).map_err(|e| CastleError::io(&backup, e))?;
        }

        let out = CatalogOut {
            gateway: &self.gateway,
            programs: &self.programs,
            services: &self.services,
            jobs: &self.jobs,
        };
        let text = serde_yaml::to_string(&out).map_err(|e| CastleError::yaml(&path, e))?;
        std::fs::write(&path, text).map_err(|e| CastleError::io(&path, e))?;
        info!(path = %path.display(), "saved catalog");
        Ok(())
    }

    /// Programs installed onto PATH as tools.
    #[must_use]
    pub fn tools(&self) -> IndexMap<&str, &ProgramSpec> {
        self.programs
            .iter()
            .filter(|(_, p)| p.is_tool())
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// Programs producing static frontend bundles.
    #[must_use]
    pub fn frontends(&self) -> IndexMap<&str, &ProgramSpec> {
        self.programs
            .iter()
            .filter(|(_, p)| p.is_frontend())
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// Ids of services and jobs with systemd management enabled.
    #[must_use]
    pub fn managed(&self) -> Vec<&str> {
        let services = self
            .services
            .iter()
            .filter(|(_, s)| s.is_managed())
            .map(|(k, _)| k.as_str());
        let jobs = self.jobs.keys().map(String::as_str);
        services.chain(jobs).collect()
    }

    /// Insert or replace a program, rejecting cross-namespace collisions
    /// on insert.
    ///
    /// # Errors
    ///
    /// [`CastleError::InvalidCatalog`] for a bad id,
    /// [`CastleError::DuplicateId`] if the id names a service or job.
    pub fn upsert_program(&mut self, id: &str, spec: ProgramSpec) -> CastleResult<()> {
        self.check_upsert(id, self.services.contains_key(id) || self.jobs.contains_key(id))?;
        self.programs.insert(id.to_owned(), spec);
        Ok(())
    }

    /// Insert or replace a service. See [`CastleConfig::upsert_program`].
    ///
    /// # Errors
    ///
    /// As for [`CastleConfig::upsert_program`], plus spec validation.
    pub fn upsert_service(&mut self, id: &str, spec: ServiceSpec) -> CastleResult<()> {
        self.check_upsert(id, self.programs.contains_key(id) || self.jobs.contains_key(id))?;
        spec.validate()
            .map_err(|msg| CastleError::invalid(format!("services.{id}: {msg}")))?;
        let previous = self.services.insert(id.to_owned(), spec);
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            // Roll back so a rejected update cannot leave the catalog invalid.
            match previous {
                Some(prev) => {
                    self.services.insert(id.to_owned(), prev);
                },
                None => {
                    self.services.shift_remove(id);
                },
            }
            Err(CastleError::InvalidCatalog { errors })
        }
    }

    /// Insert or replace a job. See [`CastleConfig::upsert_program`].
    ///
    /// # Errors
    ///
    /// As for [`CastleConfig::upsert_program`], plus spec validation.
    pub fn upsert_job(&mut self, id: &str, spec: JobSpec) -> CastleResult<()> {
        self.check_upsert(id, self.programs.contains_key(id) || self.services.contains_key(id))?;
        spec.validate()
            .map_err(|msg| CastleError::invalid(format!("jobs.{id}: {msg}")))?;
        self.jobs.insert(id.to_owned(), spec);
        Ok(())
    }

    fn check_upsert(&self, id: &str, collides: bool) -> CastleResult<()> {
        if !is_valid_id(id) {
            return Err(CastleError::invalid(format!("invalid id: {id}")));
        }
        if collides {
            return Err(CastleError::DuplicateId(id.to_owned()));
        }
        Ok(())
    }

    /// Remove an entry from whichever namespace holds it.
    ///
    /// # Errors
    ///
    /// [`CastleError::NotFound`] if no namespace holds the id.
    pub fn remove(&mut self, kind: &str, id: &str) -> CastleResult<()> {
        let removed = match kind {
            "programs" => self.programs.shift_remove(id).is_some(),
            "services" => self.services.shift_remove(id).is_some(),
            "jobs" => self.jobs.shift_remove(id).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(CastleError::NotFound {
                kind: "component",
                name: id.to_owned(),
            })
        }
    }

    /// Description for a service or job, falling through to the
    /// referenced program.
    #[must_use]
    pub fn resolve_description<'a>(
        &'a self,
        description: Option<&'a str>,
        component: Option<&str>,
    ) -> Option<&'a str> {
        description.or_else(|| {
            component
                .and_then(|c| self.programs.get(c))
                .and_then(|p| p.description.as_deref())
        })
    }

    /// Stack of the referenced program, if any.
    #[must_use]
    pub fn resolve_stack(&self, component: Option<&str>) -> Option<&str> {
        component
            .and_then(|c| self.programs.get(c))
            .and_then(|p| p.stack.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
      argv:
      - backup
    schedule: 0 2 * * *
";

    #[test]
    fn test_parse_sample() {
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.programs.len(), 1);
        let svc = &config.services["api"];
        assert_eq!(svc.internal_port(), Some(9001));
        assert_eq!(svc.health_path(), Some("/health"));
        assert_eq!(svc.proxy_path("api").as_deref(), Some("/api"));
        assert!(svc.is_managed());
        assert_eq!(config.jobs["backup"].schedule, "0 2 * * *");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = CastleConfig::parse(dir.path(), SAMPLE).unwrap();
        config.save().unwrap();
        let text = std::fs::read_to_string(config.config_path()).unwrap();
        // Structural normalization is stable: saving the loaded form again
        // produces byte-identical output.
        let reloaded = CastleConfig::load(dir.path()).unwrap();
        reloaded.save().unwrap();
        let text2 = std::fs::read_to_string(config.config_path()).unwrap();
        assert_eq!(text, text2);
        // The all-defaults systemd block survives as an empty mapping.
        assert!(text.contains("systemd: {}"), "got:\n{text}");
    }

    #[test]
    fn test_save_writes_backup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("castle.yaml"), "gateway:\n  port: 9000\n").unwrap();
        let config = CastleConfig::load(dir.path()).unwrap();
        config.save().unwrap();
        assert!(dir.path().join("castle.yaml.bak").is_file());
    }

    #[test]
    fn test_section_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = CastleConfig::parse(dir.path(), SAMPLE).unwrap();
        config.save().unwrap();
        let text = std::fs::read_to_string(config.config_path()).unwrap();
        let gateway = text.find("gateway:").unwrap();
        let programs = text.find("programs:").unwrap();
        let services = text.find("services:").unwrap();
        let jobs = text.find("jobs:").unwrap();
        assert!(gateway < programs && programs < services && services < jobs);
    }

    #[test]
    fn test_missing_catalog_is_repo_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CastleConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, CastleError::RepoUnavailable));
    }

    #[test]
    fn test_duplicate_across_namespaces_rejected() {
        let doc = "\
services:
  thing:
    run:
      runner: command
      argv: [thing]
jobs:
  thing:
    run:
      runner: command
      argv: [thing]
    schedule: 0 2 * * *
";
        let err = CastleConfig::parse(Path::new("/repo"), doc).unwrap_err();
        assert!(matches!(err, CastleError::DuplicateId(id) if id == "thing"));
    }

    #[test]
    fn test_port_collision_rejected() {
        let doc = "\
services:
  a:
    run: {runner: python, tool: a}
    expose: {http: {internal: {port: 9001}}}
  b:
    run: {runner: python, tool: b}
    expose: {http: {internal: {port: 9001}}}
";
        let err = CastleConfig::parse(Path::new("/repo"), doc).unwrap_err();
        let CastleError::InvalidCatalog { errors } = err else {
            panic!("expected InvalidCatalog");
        };
        assert!(errors.iter().any(|e| e.contains("9001")), "got: {errors:?}");
    }

    #[test]
    fn test_gateway_port_reserved() {
        let doc = "\
gateway:
  port: 9000
services:
  a:
    run: {runner: python, tool: a}
    expose: {http: {internal: {port: 9000}}}
";
        let err = CastleConfig::parse(Path::new("/repo"), doc).unwrap_err();
        assert!(err.to_string().contains("reserved"), "got: {err}");
    }

    #[test]
    fn test_validate_document_reports_each_entry() {
        let doc = "\
services:
  good:
    run: {runner: python, tool: good}
  bad:
    run: {runner: wasm}
jobs:
  nightly:
    run: {runner: command, argv: [x]}
    schedule: not a cron
";
        let report = CastleConfig::validate_document(doc);
        assert_eq!(report.service_count, 1);
        // The job parses (schedule is just a string); its cron error is
        // caught by cross-entity validation.
        assert_eq!(report.job_count, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.starts_with("services.bad:")));
        assert!(report.errors.iter().any(|e| e.starts_with("jobs.nightly:")));
    }

    #[test]
    fn test_components_alias_accepted() {
        let doc = "\
components:
  legacy:
    stack: python-cli
";
        let config = CastleConfig::parse(Path::new("/repo"), doc).unwrap();
        assert!(config.programs.contains_key("legacy"));
    }

    #[test]
    fn test_upsert_rejects_cross_namespace_duplicate() {
        let mut config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();
        let job: JobSpec = serde_yaml::from_str(
            "run: {runner: command, argv: [x]}\nschedule: 0 3 * * *\n",
        )
        .unwrap();
        let err = config.upsert_job("api", job).unwrap_err();
        assert!(matches!(err, CastleError::DuplicateId(_)));
    }

    #[test]
    fn test_upsert_service_rejects_port_collision() {
        let mut config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();
        let spec: ServiceSpec = serde_yaml::from_str(
            "run: {runner: python, tool: other}\nexpose: {http: {internal: {port: 9001}}}\n",
        )
        .unwrap();
        let err = config.upsert_service("other", spec).unwrap_err();
        assert!(matches!(err, CastleError::InvalidCatalog { .. }));
        assert!(!config.services.contains_key("other"));
    }

    #[test]
    fn test_managed_lists_services_and_jobs() {
        let config = CastleConfig::parse(Path::new("/repo"), SAMPLE).unwrap();
        let managed = config.managed();
        assert!(managed.contains(&"api"));
        assert!(managed.contains(&"backup"));
    }
}
