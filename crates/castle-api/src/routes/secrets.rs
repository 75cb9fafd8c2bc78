//! Secret management endpoints.
//!
//! Listing returns names only; values travel only on an explicit single
//! `GET /secrets/{name}` from the single-user dashboard.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::json;

use castle_core::CastleError;
use castle_core::secrets as secret_store;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body for `PUT /secrets/{name}`.
#[derive(Debug, Deserialize)]
pub struct SecretValue {
    /// The secret value (stored trimmed).
    pub value: String,
}

fn check_name(name: &str) -> ApiResult<()> {
    if secret_store::is_valid_secret_name(name) {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid secret name".to_owned()))
    }
}

/// `GET /secrets` — names only, sorted.
pub async fn list_secrets(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(secret_store::list_secrets(&state.home.secrets_dir()))
}

/// `GET /secrets/{name}`.
pub async fn get_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    check_name(&name)?;
    let value = secret_store::read_secret(&state.home.secrets_dir(), &name).ok_or(
        CastleError::NotFound {
            kind: "secret",
            name: name.clone(),
        },
    )?;
    Ok(Json(json!({"name": name, "value": value})))
}

/// `PUT /secrets/{name}`.
pub async fn set_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SecretValue>,
) -> ApiResult<Json<serde_json::Value>> {
    check_name(&name)?;
    secret_store::write_secret(&state.home.secrets_dir(), &name, &body.value)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"name": name, "ok": true})))
}

/// `DELETE /secrets/{name}` — idempotent.
pub async fn delete_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    check_name(&name)?;
    secret_store::delete_secret(&state.home.secrets_dir(), &name)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"name": name, "ok": true})))
}
