//! systemd and journalctl subprocess wrappers.
//!
//! All invocations target the user instance (`--user`). Output is piped
//! and fully consumed; commands run to completion quickly enough that no
//! dedicated deadline applies — cancellation of the surrounding request
//! reaps any follow-capable child via `kill_on_drop`.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Run `systemctl --user <action> <unit>`. Returns success plus the
/// command's output (stdout, falling back to stderr).
///
/// # Errors
///
/// Returns an error only if the process cannot be spawned.
pub async fn systemctl(action: &str, unit: &str) -> std::io::Result<(bool, String)> {
    let output = Command::new("systemctl")
        .args(["--user", action, unit])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).trim().to_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    };
    debug!(action, unit, success = output.status.success(), "systemctl");
    Ok((output.status.success(), text))
}

/// Ask systemd for a unit's active state (`active`, `inactive`, `failed`,
/// …). A spawn failure reads as `unknown`.
pub async fn unit_status(unit: &str) -> String {
    let output = Command::new("systemctl")
        .args(["--user", "is-active", unit])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let status = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if status.is_empty() {
                "unknown".to_owned()
            } else {
                status
            }
        },
        Err(_) => "unknown".to_owned(),
    }
}

/// Ask the systemd user instance to pick up changed unit files.
///
/// # Errors
///
/// Returns an error if `systemctl` cannot be spawned.
pub async fn daemon_reload() -> std::io::Result<bool> {
    let output = Command::new("systemctl")
        .args(["--user", "daemon-reload"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    Ok(output.status.success())
}

/// Read the last `n` journal lines for a unit.
///
/// # Errors
///
/// Returns an error if `journalctl` cannot be spawned.
pub async fn journal_tail(unit: &str, n: u32) -> std::io::Result<Vec<String>> {
    let output = Command::new("journalctl")
        .args(["--user", "-u", unit, "-n", &n.to_string(), "--no-pager"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect())
}

/// Build (but do not spawn) a following `journalctl -f` command. The
/// caller pipes stdout and relies on `kill_on_drop` to reap the child
/// when the client disconnects.
#[must_use]
pub fn journal_follow_command(unit: &str, n: u32) -> Command {
    let mut command = Command::new("journalctl");
    command
        .args(["--user", "-u", unit, "-n", &n.to_string(), "-f", "--no-pager"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    command
}
