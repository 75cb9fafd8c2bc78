//! API error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use castle_core::CastleError;

/// Errors surfaced by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A core pipeline error; mapped per kind (422/400/404/503/500).
    #[error(transparent)]
    Core(#[from] CastleError),

    /// A malformed request outside the catalog schema rules.
    #[error("{0}")]
    BadRequest(String),

    /// A systemd control command failed.
    #[error("systemd {action} failed for {unit}: {detail}")]
    SystemdAction {
        /// The attempted action.
        action: String,
        /// The unit acted on.
        unit: String,
        /// Captured stderr (or the post-action state).
        detail: String,
    },

    /// Anything else; mapped to 500.
    #[error("{0}")]
    Internal(String),
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(core) => match core {
                CastleError::InvalidCatalog { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CastleError::DuplicateId(_) => StatusCode::BAD_REQUEST,
                CastleError::NotFound { .. } => StatusCode::NOT_FOUND,
                CastleError::RepoUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                CastleError::Io { .. } | CastleError::Yaml { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SystemdAction { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Core(CastleError::InvalidCatalog { errors }) => json!({
                "detail": "invalid catalog",
                "errors": errors,
            }),
            ApiError::Core(CastleError::RepoUnavailable) => json!({
                "detail": "Castle repo not available on this node.",
            }),
            other => json!({ "detail": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(CastleError::InvalidCatalog { errors: vec![] }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(CastleError::DuplicateId("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(CastleError::NotFound {
                kind: "service",
                name: "x".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(CastleError::RepoUnavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::SystemdAction {
                action: "start".into(),
                unit: "castle-x.service".into(),
                detail: "boom".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
