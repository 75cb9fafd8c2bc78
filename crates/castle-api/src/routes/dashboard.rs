//! Catalog/registry views and gateway endpoints.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use castle_core::CastleError;
use castle_core::generators::{generate_caddyfile, write_caddyfile};
use castle_core::registry::Behavior;

use crate::error::{ApiError, ApiResult};
use crate::health::{check_all_health, health_payload};
use crate::routes::models::{ComponentDetail, ComponentSummary};
use crate::state::AppState;

/// `GET /programs` — catalog programs (requires the repo).
pub async fn list_programs(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ComponentSummary>>> {
    let config = state.config()?;
    let summaries = config
        .programs
        .iter()
        .map(|(id, program)| ComponentSummary::from_program(id, program, &config.root))
        .collect();
    Ok(Json(summaries))
}

/// `GET /programs/{id}`.
pub async fn get_program(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ComponentDetail>> {
    let config = state.config()?;
    let program = config.programs.get(&id).ok_or(CastleError::NotFound {
        kind: "program",
        name: id.clone(),
    })?;
    Ok(Json(ComponentDetail {
        summary: ComponentSummary::from_program(&id, program, &config.root),
        manifest: serde_json::to_value(program)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    }))
}

/// `GET /services` — deployed daemons first, then catalog-only services.
pub async fn list_services(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ComponentSummary>>> {
    let mut summaries = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Ok(registry) = state.registry() {
        for (id, deployed) in &registry.deployed {
            if deployed.behavior == Behavior::Daemon {
                summaries.push(ComponentSummary::from_deployed(id, deployed, None));
                seen.insert(id.clone());
            }
        }
    }

    if let Ok(config) = state.config() {
        for (id, svc) in &config.services {
            if !seen.contains(id) {
                summaries.push(ComponentSummary::from_service(id, svc, &config));
            }
        }
        backfill_sources(&mut summaries, &config);
    }

    Ok(Json(summaries))
}

/// `GET /services/{id}` — deployed state wins over catalog defaults.
pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ComponentDetail>> {
    if let Ok(registry) = state.registry() {
        if let Some(deployed) = registry.deployed.get(&id) {
            if deployed.behavior == Behavior::Daemon {
                let mut summary = ComponentSummary::from_deployed(&id, deployed, None);
                if let Ok(config) = state.config() {
                    backfill_sources(std::slice::from_mut(&mut summary), &config);
                }
                return Ok(Json(ComponentDetail {
                    manifest: serde_json::to_value(deployed)
                        .map_err(|e| ApiError::Internal(e.to_string()))?,
                    summary,
                }));
            }
        }
    }

    let config = state.config()?;
    let svc = config.services.get(&id).ok_or(CastleError::NotFound {
        kind: "service",
        name: id.clone(),
    })?;
    Ok(Json(ComponentDetail {
        summary: ComponentSummary::from_service(&id, svc, &config),
        manifest: serde_json::to_value(svc).map_err(|e| ApiError::Internal(e.to_string()))?,
    }))
}

/// `GET /jobs`.
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<ComponentSummary>>> {
    let mut summaries = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Ok(registry) = state.registry() {
        for (id, deployed) in &registry.deployed {
            if deployed.schedule.is_some() {
                summaries.push(ComponentSummary::from_deployed(id, deployed, None));
                seen.insert(id.clone());
            }
        }
    }

    if let Ok(config) = state.config() {
        for (id, job) in &config.jobs {
            if !seen.contains(id) {
                summaries.push(ComponentSummary::from_job(id, job, &config));
            }
        }
        backfill_sources(&mut summaries, &config);
    }

    Ok(Json(summaries))
}

/// `GET /jobs/{id}`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ComponentDetail>> {
    if let Ok(registry) = state.registry() {
        if let Some(deployed) = registry.deployed.get(&id) {
            if deployed.schedule.is_some() {
                return Ok(Json(ComponentDetail {
                    summary: ComponentSummary::from_deployed(&id, deployed, None),
                    manifest: serde_json::to_value(deployed)
                        .map_err(|e| ApiError::Internal(e.to_string()))?,
                }));
            }
        }
    }

    let config = state.config()?;
    let job = config.jobs.get(&id).ok_or(CastleError::NotFound {
        kind: "job",
        name: id.clone(),
    })?;
    Ok(Json(ComponentDetail {
        summary: ComponentSummary::from_job(&id, job, &config),
        manifest: serde_json::to_value(job).map_err(|e| ApiError::Internal(e.to_string()))?,
    }))
}

/// Fill in `source` from program refs for rows that lack one.
fn backfill_sources(summaries: &mut [ComponentSummary], config: &castle_core::CastleConfig) {
    for summary in summaries.iter_mut().filter(|s| s.source.is_none()) {
        let component_ref = config
            .services
            .get(&summary.id)
            .and_then(|s| s.component.as_deref())
            .or_else(|| config.jobs.get(&summary.id).and_then(|j| j.component.as_deref()));

        summary.source = config
            .programs
            .get(&summary.id)
            .and_then(|p| p.source.clone())
            .or_else(|| {
                component_ref
                    .and_then(|c| config.programs.get(c))
                    .and_then(|p| p.source.clone())
            });
    }
}

/// `GET /status` — an on-demand health poll.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let registry = state.registry()?;
    let statuses = check_all_health(&state.http, &registry).await;
    Ok(Json(health_payload(&statuses)))
}

/// Gateway configuration summary.
#[derive(Debug, Serialize)]
pub struct GatewayInfo {
    /// Gateway listen port.
    pub port: u16,
    /// Total deployed components.
    pub component_count: usize,
    /// Components exposing a port.
    pub service_count: usize,
    /// Components under systemd management.
    pub managed_count: usize,
}

/// `GET /gateway`.
pub async fn get_gateway(State(state): State<AppState>) -> ApiResult<Json<GatewayInfo>> {
    let registry = state.registry()?;
    Ok(Json(GatewayInfo {
        port: registry.node.gateway_port,
        component_count: registry.deployed.len(),
        service_count: registry
            .deployed
            .values()
            .filter(|d| d.port.is_some())
            .count(),
        managed_count: registry.deployed.values().filter(|d| d.managed).count(),
    }))
}

/// `GET /gateway/caddyfile` — the config as it would be generated now.
pub async fn get_caddyfile(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let registry = state.registry()?;
    let content = generate_caddyfile(
        &registry,
        &state.remote_routes(),
        &state.home.static_bundle_dir("castle-app"),
        &state.home.generated_dir(),
    );
    Ok(Json(json!({ "content": content })))
}

/// `POST /gateway/reload` — regenerate the config and reload Caddy.
pub async fn reload_gateway(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let registry = state.registry()?;
    write_caddyfile(&registry, &state.remote_routes(), &state.home)?;

    let caddyfile = state.home.caddyfile_path();
    let output = tokio::process::Command::new("caddy")
        .args(["reload", "--config"])
        .arg(&caddyfile)
        .args(["--adapter", "caddyfile"])
        .output()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to spawn caddy: {e}")))?;

    if output.status.success() {
        Ok(Json(json!({"ok": true})))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        warn!(stderr = %stderr, "caddy reload failed");
        Err(ApiError::Internal(format!("caddy reload failed: {stderr}")))
    }
}
