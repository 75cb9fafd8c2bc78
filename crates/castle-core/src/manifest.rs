//! Declarative spec types for the catalog.
//!
//! Three kinds of entries live in `castle.yaml`:
//!
//! - [`ProgramSpec`] — software that exists on disk. A program never runs
//!   by itself; services and jobs reference one by id.
//! - [`ServiceSpec`] — a long-running daemon deployment.
//! - [`JobSpec`] — a scheduled task deployment.
//!
//! Serde does double duty here: deserialization applies defaults and
//! rejects unknown keys (so a typo'd field surfaces with its key path),
//! while serialization emits the *minimal* form — default values are
//! skipped so a round-trip through load/save does not inflate the file.
//! Structurally-significant sub-maps (`manage`, `systemd`, `expose`, …)
//! are `Option`s around all-default structs: `Some(default)` round-trips
//! as an empty mapping, which is how the user spells "enabled, all
//! defaults".

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Environment variable map with stable insertion order.
pub type EnvMap = IndexMap<String, String>;

/// Valid catalog ids: lowercase alphanumeric start, then `[a-z0-9\-_.]`,
/// 2–64 characters total.
static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9\-_.]{1,63}$").unwrap_or_else(|_| unreachable!())
});

/// Check whether `id` is a valid catalog id.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    ID_RE.is_match(id)
}

/// Systemd restart policy for managed daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart.
    No,
    /// Restart only on non-zero exit.
    #[default]
    OnFailure,
    /// Always restart.
    Always,
}

impl RestartPolicy {
    fn is_default(&self) -> bool {
        *self == Self::OnFailure
    }

    /// The systemd `Restart=` value for this policy.
    #[must_use]
    pub fn as_systemd(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
        }
    }
}

/// TLS mode for publicly exposed hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain HTTP.
    Off,
    /// Caddy's internal CA.
    #[default]
    Internal,
    /// ACME via Let's Encrypt.
    Letsencrypt,
}

impl TlsMode {
    fn is_default(&self) -> bool {
        *self == Self::Internal
    }
}

/// Node package manager used by the `node` runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// npm
    Npm,
    /// pnpm (the default)
    #[default]
    Pnpm,
    /// yarn
    Yarn,
}

impl PackageManager {
    fn is_default(&self) -> bool {
        *self == Self::Pnpm
    }

    /// The executable name.
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
        }
    }
}

/// The runner kind, independent of runner-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runner {
    /// Arbitrary argv.
    Command,
    /// A PATH-installed Python tool.
    Python,
    /// A container image run under podman/docker.
    Container,
    /// A package.json script.
    Node,
    /// A deployment that runs elsewhere; proxied only.
    Remote,
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::Python => "python",
            Self::Container => "container",
            Self::Node => "node",
            Self::Remote => "remote",
        };
        f.write_str(s)
    }
}

/// How a service or job runs, discriminated by the `runner` tag.
///
/// An unknown tag fails deserialization — there is no catch-all variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "runner", rename_all = "lowercase")]
pub enum RunSpec {
    /// Run an explicit argv; `argv[0]` is PATH-resolved at compile time.
    Command {
        /// The command line; must be non-empty.
        argv: Vec<String>,
    },
    /// Run a PATH-installed Python tool.
    Python {
        /// The installed tool name.
        tool: String,
        /// Extra arguments.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Run a container image in the foreground.
    Container {
        /// Image reference, e.g. `docker.io/library/redis:7`.
        image: String,
        /// Override for the image CMD.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<Vec<String>>,
        /// Arguments appended after the command.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// `container_port -> host_port` publishes.
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        ports: IndexMap<u16, u16>,
        /// `host:container[:ro]` volume mounts.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        volumes: Vec<String>,
        /// Container-scoped environment.
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        env: EnvMap,
        /// Working directory inside the container.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<String>,
    },
    /// Run a package.json script.
    Node {
        /// Script name, e.g. `start`.
        script: String,
        /// Package manager to invoke.
        #[serde(default, skip_serializing_if = "PackageManager::is_default")]
        package_manager: PackageManager,
        /// Extra arguments.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// A deployment running on another machine; only proxied from here.
    Remote {
        /// Base URL of the remote deployment.
        base_url: String,
        /// Optional health endpoint URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health_url: Option<String>,
    },
}

impl RunSpec {
    /// The runner kind of this spec.
    #[must_use]
    pub fn runner(&self) -> Runner {
        match self {
            Self::Command { .. } => Runner::Command,
            Self::Python { .. } => Runner::Python,
            Self::Container { .. } => Runner::Container,
            Self::Node { .. } => Runner::Node,
            Self::Remote { .. } => Runner::Remote,
        }
    }
}

/// HTTP readiness probe for managed daemons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessHttpGet {
    /// URL to probe, possibly templated (`http://127.0.0.1:${PORT}/healthz`).
    pub http_get: String,
    /// Per-probe timeout.
    #[serde(default = "default_probe_secs", skip_serializing_if = "is_default_probe_secs")]
    pub timeout_seconds: u32,
    /// Interval between probes.
    #[serde(default = "default_probe_secs", skip_serializing_if = "is_default_probe_secs")]
    pub interval_seconds: u32,
    /// HTTP status codes counted as ready.
    #[serde(default = "default_success_codes", skip_serializing_if = "is_default_success_codes")]
    pub success_codes: Vec<u16>,
}

fn default_probe_secs() -> u32 {
    2
}

fn is_default_probe_secs(v: &u32) -> bool {
    *v == 2
}

fn default_success_codes() -> Vec<u16> {
    vec![200]
}

fn is_default_success_codes(v: &[u16]) -> bool {
    v == [200]
}

/// Systemd management options for a service or job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemdSpec {
    /// Whether the unit is generated and managed at all.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enable: bool,
    /// Run under the user instance (the only supported mode).
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub user: bool,
    /// Unit description override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Units this one orders after.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    /// Hard dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Install targets.
    #[serde(default = "default_wanted_by", skip_serializing_if = "is_default_wanted_by")]
    pub wanted_by: Vec<String>,
    /// Restart policy for daemons.
    #[serde(default, skip_serializing_if = "RestartPolicy::is_default")]
    pub restart: RestartPolicy,
    /// Seconds between restarts.
    #[serde(default = "default_restart_sec", skip_serializing_if = "is_default_restart_sec")]
    pub restart_sec: u32,
    /// Emit `NoNewPrivileges=true`.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub no_new_privileges: bool,
    /// Optional HTTP readiness probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessHttpGet>,
    /// `ExecReload=` command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_reload: Option<String>,
}

impl Default for SystemdSpec {
    fn default() -> Self {
        Self {
            enable: true,
            user: true,
            description: None,
            after: Vec::new(),
            requires: Vec::new(),
            wanted_by: default_wanted_by(),
            restart: RestartPolicy::default(),
            restart_sec: default_restart_sec(),
            no_new_privileges: true,
            readiness: None,
            exec_reload: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_true(v: &bool) -> bool {
    *v
}

fn default_wanted_by() -> Vec<String> {
    vec!["default.target".to_owned()]
}

fn is_default_wanted_by(v: &[String]) -> bool {
    v.len() == 1 && v[0] == "default.target"
}

fn default_restart_sec() -> u32 {
    2
}

fn is_default_restart_sec(v: &u32) -> bool {
    *v == 2
}

/// Lifecycle management block. Presence of an empty `manage:` mapping is
/// structurally significant and survives round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ManageSpec {
    /// Systemd management; `systemd: {}` means enabled with all defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd: Option<SystemdSpec>,
}

/// PATH installation options for a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PathInstallSpec {
    /// Whether the tool is installed onto PATH.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enable: bool,
    /// Executable name override; defaults to the program id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Install a shim rather than a copy.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub shim: bool,
}

/// Installation block for a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct InstallSpec {
    /// PATH installation; `path: {}` means install with all defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathInstallSpec>,
}

/// Tool metadata for a program. Unknown keys are tolerated here — tool
/// blocks historically carried free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool version.
    #[serde(default = "default_tool_version", skip_serializing_if = "is_default_tool_version")]
    pub version: String,
    /// System packages the tool needs at runtime.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_dependencies: Vec<String>,
}

impl Default for ToolSpec {
    fn default() -> Self {
        Self {
            version: default_tool_version(),
            system_dependencies: Vec::new(),
        }
    }
}

fn default_tool_version() -> String {
    "1.0.0".to_owned()
}

fn is_default_tool_version(v: &str) -> bool {
    v == "1.0.0"
}

/// Internal (LAN-local) listen address of an exposed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpInternal {
    /// Bind host.
    #[serde(default = "default_internal_host", skip_serializing_if = "is_default_internal_host")]
    pub host: String,
    /// Bind port; unique per node, and never the gateway port.
    pub port: u16,
    /// Unix socket path, when the service listens on one instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_socket: Option<String>,
}

fn default_internal_host() -> String {
    "127.0.0.1".to_owned()
}

fn is_default_internal_host(v: &str) -> bool {
    v == "127.0.0.1"
}

/// Public exposure of a service through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpPublic {
    /// Public hostnames; must be non-empty.
    pub hostnames: Vec<String>,
    /// Path prefix under those hostnames.
    #[serde(default = "default_path_prefix", skip_serializing_if = "is_default_path_prefix")]
    pub path_prefix: String,
    /// TLS mode.
    #[serde(default, skip_serializing_if = "TlsMode::is_default")]
    pub tls: TlsMode,
}

fn default_path_prefix() -> String {
    "/".to_owned()
}

fn is_default_path_prefix(v: &str) -> bool {
    v == "/"
}

/// HTTP exposure of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpExposeSpec {
    /// Where the service listens locally.
    pub internal: HttpInternal,
    /// Optional public exposure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<HttpPublic>,
    /// Health endpoint path, e.g. `/health`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
}

/// Exposure block for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ExposeSpec {
    /// HTTP exposure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpExposeSpec>,
}

/// Caddy proxying options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CaddySpec {
    /// Whether a gateway route is generated.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enable: bool,
    /// Route path prefix; defaults to `/<id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Extra Caddyfile lines, carried through the catalog verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_snippets: Vec<String>,
}

/// Proxy block for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProxySpec {
    /// Caddy proxying; `caddy: {}` means a default route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caddy: Option<CaddySpec>,
}

/// Build instructions for a program that produces artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    /// Commands run in the program's source directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Vec<String>>,
    /// Output directories, relative to the source directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

/// Deployment-time defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsSpec {
    /// Environment variables merged over the compile-time conventions.
    /// Values may reference `${secret:NAME}`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: EnvMap,
}

/// A catalog program — software that exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Source directory, relative to the catalog root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Scaffold stack, e.g. `python-fastapi`. `type` is a deprecated alias.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// PATH installation; presence marks the program as a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,
    /// Tool metadata; presence also marks the program as a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSpec>,
    /// Build instructions; outputs mark the program as a frontend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ProgramSpec {
    /// Source directory with any trailing slash removed.
    #[must_use]
    pub fn source_dir(&self) -> Option<&str> {
        self.source.as_deref().map(|s| s.trim_end_matches('/'))
    }

    /// Whether the program is installed onto PATH as a tool.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        self.install.as_ref().is_some_and(|i| i.path.is_some()) || self.tool.is_some()
    }

    /// Whether the program produces a static frontend bundle.
    #[must_use]
    pub fn is_frontend(&self) -> bool {
        self.build
            .as_ref()
            .is_some_and(|b| !b.outputs.is_empty() || !b.commands.is_empty())
    }
}

/// A catalog service — a long-running daemon deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Referenced program id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Human description; falls through to the referenced program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the service runs.
    pub run: RunSpec,
    /// HTTP exposure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<ExposeSpec>,
    /// Gateway proxying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    /// Lifecycle management.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage: Option<ManageSpec>,
    /// Deployment-time defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsSpec>,
}

impl ServiceSpec {
    /// Whether the service is systemd-managed. Defaults to true; only an
    /// explicit `manage.systemd.enable: false` opts out.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        !matches!(
            self.manage.as_ref().and_then(|m| m.systemd.as_ref()),
            Some(sd) if !sd.enable
        )
    }

    /// The internal HTTP port, if exposed.
    #[must_use]
    pub fn internal_port(&self) -> Option<u16> {
        self.expose
            .as_ref()
            .and_then(|e| e.http.as_ref())
            .map(|h| h.internal.port)
    }

    /// The health endpoint path, if exposed.
    #[must_use]
    pub fn health_path(&self) -> Option<&str> {
        self.expose
            .as_ref()
            .and_then(|e| e.http.as_ref())
            .and_then(|h| h.health_path.as_deref())
    }

    /// The gateway route prefix, if proxied: the configured prefix or
    /// `/<id>` when a default route is requested.
    #[must_use]
    pub fn proxy_path(&self, id: &str) -> Option<String> {
        let caddy = self.proxy.as_ref().and_then(|p| p.caddy.as_ref())?;
        if !caddy.enable {
            return None;
        }
        Some(
            caddy
                .path_prefix
                .clone()
                .unwrap_or_else(|| format!("/{id}")),
        )
    }

    /// Structural validation beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns a message if `runner: remote` is combined with enabled
    /// systemd management — a remote deployment has no local process.
    pub fn validate(&self) -> Result<(), String> {
        let systemd_enabled = matches!(
            self.manage.as_ref().and_then(|m| m.systemd.as_ref()),
            Some(sd) if sd.enable
        );
        if systemd_enabled && self.run.runner() == Runner::Remote {
            return Err("manage.systemd cannot be enabled for runner=remote".to_owned());
        }
        if let RunSpec::Command { argv } = &self.run {
            if argv.is_empty() {
                return Err("run.argv must not be empty".to_owned());
            }
        }
        if let Some(public) = self
            .expose
            .as_ref()
            .and_then(|e| e.http.as_ref())
            .and_then(|h| h.public.as_ref())
        {
            if public.hostnames.is_empty() {
                return Err("expose.http.public.hostnames must not be empty".to_owned());
            }
        }
        Ok(())
    }
}

/// A catalog job — a scheduled task deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Referenced program id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Human description; falls through to the referenced program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the job runs.
    pub run: RunSpec,
    /// Five-field cron schedule.
    pub schedule: String,
    /// IANA timezone the schedule is interpreted in.
    #[serde(default = "default_timezone", skip_serializing_if = "is_default_timezone")]
    pub timezone: String,
    /// Lifecycle management.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage: Option<ManageSpec>,
    /// Deployment-time defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsSpec>,
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_owned()
}

fn is_default_timezone(v: &str) -> bool {
    v == "America/Los_Angeles"
}

impl JobSpec {
    /// Structural validation beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns a message if the schedule is not a valid five-field cron
    /// expression, or a remote runner is used for a scheduled task.
    pub fn validate(&self) -> Result<(), String> {
        if self.run.runner() == Runner::Remote {
            return Err("jobs cannot use runner=remote".to_owned());
        }
        validate_schedule(&self.schedule)
    }
}

/// Validate a five-field cron expression.
///
/// The `cron` crate parses six/seven field expressions (with seconds), so
/// a zero seconds field is prepended before parsing.
///
/// # Errors
///
/// Returns a message describing the parse failure.
pub fn validate_schedule(schedule: &str) -> Result<(), String> {
    let fields = schedule.split_whitespace().count();
    if fields != 5 {
        return Err(format!(
            "schedule must have 5 fields (minute hour day month weekday), got {fields}"
        ));
    }
    cron::Schedule::from_str(&format!("0 {schedule}"))
        .map(|_| ())
        .map_err(|e| format!("invalid schedule '{schedule}': {e}"))
}
