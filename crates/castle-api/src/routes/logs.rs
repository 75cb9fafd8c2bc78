//! Journal tailing for managed components.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout};

use castle_core::CastleError;
use castle_core::generators::unit_name;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::systemd_ctl::{journal_follow_command, journal_tail};

/// Query options for `GET /logs/{id}`.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Number of lines to return (or start a follow with).
    #[serde(default = "default_lines")]
    pub n: u32,
    /// Stream new lines over SSE instead of returning a snapshot.
    #[serde(default)]
    pub follow: bool,
}

fn default_lines() -> u32 {
    100
}

const MAX_LINES: u32 = 5000;

/// `GET /logs/{id}?n=&follow=`.
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    if query.n == 0 || query.n > MAX_LINES {
        return Err(ApiError::BadRequest(format!(
            "n must be between 1 and {MAX_LINES}"
        )));
    }

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

    if query.follow {
        return follow_logs(&unit, query.n);
    }

    let lines = journal_tail(&unit, query.n)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to spawn journalctl: {e}")))?;
    Ok(Json(json!({"component": id, "lines": lines})).into_response())
}

/// Stream `journalctl -f` output as SSE data frames. The child is spawned
/// with `kill_on_drop`, so a client disconnect reaps it with the stream.
fn follow_logs(unit: &str, n: u32) -> ApiResult<Response> {
    let mut child = journal_follow_command(unit, n)
        .spawn()
        .map_err(|e| ApiError::Internal(format!("failed to spawn journalctl: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::Internal("journalctl stdout not captured".to_owned()))?;
    let lines = BufReader::new(stdout).lines();

    // The child rides along in the stream state so it lives exactly as
    // long as the connection.
    let stream = stream::unfold(FollowState { lines, _child: child }, |mut fs| async move {
        match fs.lines.next_line().await {
            Ok(Some(line)) => Some((Ok::<_, Infallible>(Event::default().data(line)), fs)),
            Ok(None) | Err(_) => None,
        }
    });

    Ok(Sse::new(stream).into_response())
}

struct FollowState {
    lines: Lines<BufReader<ChildStdout>>,
    _child: Child,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_values() {
        let query: LogsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.n, 100);
        assert!(!query.follow);
    }
}
