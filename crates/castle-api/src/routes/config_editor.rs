//! Config editor — read, validate, save, and apply catalog changes.
//!
//! Saving and applying are deliberately separate steps: `PUT /config`
//! only validates and persists the catalog; `POST /config/apply` runs the
//! compile pipeline and projects the result onto the OS.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use castle_core::generators::{write_caddyfile, write_unit_files};
use castle_core::manifest::{JobSpec, ProgramSpec, ServiceSpec};
use castle_core::registry::{NodeConfig, save_registry};
use castle_core::{CastleConfig, CastleError, compile, home};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::systemd_ctl;

/// Response for `GET /config`.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    /// Raw `castle.yaml` text.
    pub yaml_content: String,
}

/// Body for `PUT /config`.
#[derive(Debug, Deserialize)]
pub struct ConfigSaveRequest {
    /// Raw `castle.yaml` text to validate and persist.
    pub yaml_content: String,
}

/// Response for `PUT /config`.
#[derive(Debug, Serialize)]
pub struct ConfigSaveResponse {
    /// Whether the document was saved.
    pub ok: bool,
    /// Programs that validated.
    pub program_count: usize,
    /// Services that validated.
    pub service_count: usize,
    /// Jobs that validated.
    pub job_count: usize,
    /// Always empty on success (errors surface as 422).
    pub errors: Vec<String>,
}

/// Body for `PUT /config/{kind}/{id}`.
#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    /// The entry's configuration body.
    pub config: serde_json::Value,
}

/// Response for `POST /config/apply`.
#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    /// Whether the apply completed.
    pub ok: bool,
    /// Human-readable record of what happened.
    pub actions: Vec<String>,
    /// Non-fatal problems encountered along the way.
    pub errors: Vec<String>,
}

/// `GET /config` — the raw catalog text.
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<ConfigResponse>> {
    let root = state
        .castle_root
        .as_deref()
        .ok_or(CastleError::RepoUnavailable)?;
    let path = root.join("castle.yaml");
    let yaml_content =
        std::fs::read_to_string(&path).map_err(|e| CastleError::io(&path, e))?;
    Ok(Json(ConfigResponse { yaml_content }))
}

/// `PUT /config` — validate and save. Does NOT apply.
pub async fn put_config(
    State(state): State<AppState>,
    Json(request): Json<ConfigSaveRequest>,
) -> ApiResult<Json<ConfigSaveResponse>> {
    let root = state
        .castle_root
        .as_deref()
        .ok_or(CastleError::RepoUnavailable)?;

    let report = CastleConfig::validate_document(&request.yaml_content);
    if !report.errors.is_empty() {
        return Err(CastleError::InvalidCatalog {
            errors: report.errors,
        }
        .into());
    }

    // Preserve the user's formatting: persist the submitted text verbatim,
    // after the usual backup of the current file.
    let path = root.join("castle.yaml");
    if path.is_file() {
        let backup = path.with_extension("yaml.bak");
        std::fs::copy(&path, &backup).map_err(|e| CastleError::io(&backup, e))?;
    }
    std::fs::write(&path, &request.yaml_content).map_err(|e| CastleError::io(&path, e))?;

    state.broadcaster.broadcast("config-changed", &json!({"source": "editor"}));
    info!(path = %path.display(), "catalog saved via editor");

    Ok(Json(ConfigSaveResponse {
        ok: true,
        program_count: report.program_count,
        service_count: report.service_count,
        job_count: report.job_count,
        errors: Vec::new(),
    }))
}

/// `PUT /config/{kind}/{id}` — create or replace one entry.
pub async fn put_entry(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(request): Json<EntryRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut config = state.config()?;

    match kind.as_str() {
        "programs" => {
            let spec: ProgramSpec = parse_spec(&kind, &id, request.config)?;
            config.upsert_program(&id, spec)?;
        },
        "services" => {
            let spec: ServiceSpec = parse_spec(&kind, &id, request.config)?;
            config.upsert_service(&id, spec)?;
        },
        "jobs" => {
            let spec: JobSpec = parse_spec(&kind, &id, request.config)?;
            config.upsert_job(&id, spec)?;
        },
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown config section '{other}'"
            )));
        },
    }

    config.save()?;
    state.broadcaster.broadcast("config-changed", &json!({"source": "editor", "id": id}));
    Ok(Json(json!({"ok": true, "kind": kind, "id": id})))
}

/// `DELETE /config/{kind}/{id}`.
pub async fn delete_entry(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    if !matches!(kind.as_str(), "programs" | "services" | "jobs") {
        return Err(ApiError::BadRequest(format!(
            "unknown config section '{kind}'"
        )));
    }

    let mut config = state.config()?;
    config.remove(&kind, &id)?;
    config.save()?;
    state.broadcaster.broadcast("config-changed", &json!({"source": "editor", "id": id}));
    Ok(Json(json!({"ok": true, "kind": kind, "id": id})))
}

fn parse_spec<T: serde::de::DeserializeOwned>(
    kind: &str,
    id: &str,
    value: serde_json::Value,
) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| {
        CastleError::InvalidCatalog {
            errors: vec![format!("{kind}.{id}: {e}")],
        }
        .into()
    })
}

/// `POST /config/apply` — compile the catalog and project it onto the OS.
pub async fn apply_config(State(state): State<AppState>) -> ApiResult<Json<ApplyResponse>> {
    let config = state.config()?;
    let mut actions = Vec::new();
    let mut errors = Vec::new();

    state.home.ensure().map_err(|e| ApiError::Internal(e.to_string()))?;

    let node = NodeConfig::local(
        Some(config.root.display().to_string()),
        config.gateway.port,
    );
    let registry = compile(&config, node, &state.home)?;
    actions.push(format!("compiled {} component(s)", registry.deployed.len()));

    save_registry(&registry, &state.home.registry_path())?;
    actions.push("wrote registry".to_owned());

    let unit_dir = home::systemd_user_dir().map_err(|e| ApiError::Internal(e.to_string()))?;
    let home_dir = unit_dir
        .ancestors()
        .nth(3)
        .map(std::path::Path::to_path_buf)
        .unwrap_or_default();
    let units = write_unit_files(&registry, Some(&config), &unit_dir, &home_dir)?;
    actions.push(format!("wrote {} unit file(s)", units.len()));

    write_caddyfile(&registry, &state.remote_routes(), &state.home)?;
    actions.push("wrote gateway config".to_owned());

    match systemd_ctl::daemon_reload().await {
        Ok(true) => actions.push("reloaded systemd daemon".to_owned()),
        Ok(false) => errors.push("systemctl --user daemon-reload failed".to_owned()),
        Err(e) => errors.push(format!("could not run systemctl: {e}")),
    }

    if let Some(coordinator) = &state.coordinator {
        if let Err(e) = coordinator.publish_registry(&registry).await {
            warn!(error = %e, "failed to re-publish registry to the mesh");
            errors.push(format!("mesh publish failed: {e}"));
        } else {
            actions.push("published registry to the mesh".to_owned());
        }
    }

    state.broadcaster.broadcast("config-changed", &json!({"source": "apply"}));

    Ok(Json(ApplyResponse {
        ok: true,
        actions,
        errors,
    }))
}
