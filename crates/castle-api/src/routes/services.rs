//! Service control actions.
//!
//! `POST /services/{id}/{start|stop|restart}` drives the systemd user
//! instance and answers with the post-action `is-active` state verbatim.
//! A fresh `health` frame is broadcast immediately with the acting
//! component's status taken from systemd rather than the next HTTP poll —
//! the probe would race the transition it just caused.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::info;

use castle_core::CastleError;
use castle_core::generators::unit_name;

use crate::error::{ApiError, ApiResult};
use crate::health::broadcast_with_override;
use crate::state::AppState;
use crate::systemd_ctl::{systemctl, unit_status};

/// The daemon's own component id; restarting it needs a deferred call so
/// the HTTP response can flush first.
pub const SELF_NAME: &str = "castle-api";

/// Delay before a deferred self-action fires.
const SELF_ACTION_DELAY: Duration = Duration::from_millis(500);

fn validate_action(action: &str) -> ApiResult<()> {
    match action {
        "start" | "stop" | "restart" => Ok(()),
        _ => Err(ApiError::BadRequest(format!(
            "unsupported action '{action}' (expected start, stop, or restart)"
        ))),
    }
}

/// `POST /services/{id}/{action}`.
pub async fn service_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Response> {
    validate_action(&action)?;

    // Only components the registry marks as managed have a unit to drive.
    let registry = state.registry()?;
    let managed = registry.deployed.get(&id).is_some_and(|d| d.managed);
    if !managed {
        return Err(CastleError::NotFound {
            kind: "managed service",
            name: id,
        }
        .into());
    }

    let unit = unit_name(&id);

    // Self-restart: answer 202 first, act ~0.5 s later.
    if id == SELF_NAME && matches!(action.as_str(), "restart" | "stop") {
        let deferred_unit = unit.clone();
        let deferred_action = action.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SELF_ACTION_DELAY).await;
            let _ = systemctl(&deferred_action, &deferred_unit).await;
        });
        info!(component = %id, action = %action, "deferred self action");
        let body = json!({"component": id, "action": action, "status": "accepted"});
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let (ok, output) = systemctl(&action, &unit)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to spawn systemctl: {e}")))?;
    let status = unit_status(&unit).await;

    // The action result is broadcast either way; a watcher should see
    // failed transitions too.
    state.broadcaster.broadcast(
        "service",
        &json!({"component": id, "action": action, "status": status}),
    );

    if !ok || status == "failed" {
        return Err(ApiError::SystemdAction {
            action,
            unit,
            detail: if output.is_empty() { status } else { output },
        });
    }

    broadcast_with_override(&state, &id, status == "active").await;

    info!(component = %id, action = %action, status = %status, "service action");
    Ok(Json(json!({"component": id, "action": action, "status": status})).into_response())
}
