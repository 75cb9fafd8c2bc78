//! Systemd unit and timer generation.
//!
//! Units are generated from the registry only: `ExecStart` is the resolved
//! command line, every environment variable is a literal, and no
//! `WorkingDirectory` is emitted — a compiled component must run with no
//! reference to the source tree.

use std::path::Path;

use crate::manifest::{RestartPolicy, SystemdSpec};
use crate::registry::DeployedComponent;

/// Prefix for all generated unit names.
pub const UNIT_PREFIX: &str = "castle-";

/// The systemd service unit name for a component.
#[must_use]
pub fn unit_name(id: &str) -> String {
    format!("{UNIT_PREFIX}{id}.service")
}

/// The systemd timer name for a scheduled component.
#[must_use]
pub fn timer_name(id: &str) -> String {
    format!("{UNIT_PREFIX}{id}.timer")
}

/// Best-effort conversion of a five-field cron expression to a systemd
/// `OnCalendar` spec.
///
/// Daily-at-a-time patterns (`m h * * *`) convert; `*/N` interval patterns
/// return `None` so the caller uses `OnUnitActiveSec` instead; anything
/// else also returns `None`.
#[must_use]
pub fn cron_to_oncalendar(cron: &str) -> Option<String> {
    let parts: Vec<&str> = cron.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = parts.as_slice() else {
        return None;
    };

    if minute.starts_with("*/") && [*hour, *dom, *month, *dow] == ["*"; 4] {
        return None;
    }

    if [*dom, *month, *dow] == ["*"; 3] {
        let h = pad_field(hour)?;
        let m = pad_field(minute)?;
        return Some(format!("*-*-* {h}:{m}:00"));
    }

    None
}

fn pad_field(field: &str) -> Option<String> {
    if field == "*" {
        return Some("*".to_owned());
    }
    let n: u8 = field.parse().ok()?;
    Some(format!("{n:02}"))
}

/// Extract interval seconds from a `*/N * * * *` cron pattern.
#[must_use]
pub fn cron_to_interval_sec(cron: &str) -> Option<u64> {
    let parts: Vec<&str> = cron.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = parts.as_slice() else {
        return None;
    };
    if [*hour, *dom, *month, *dow] != ["*"; 4] {
        return None;
    }
    let n: u64 = minute.strip_prefix("*/")?.parse().ok()?;
    Some(n.saturating_mul(60))
}

/// Generate a systemd service unit for a deployed component.
///
/// Scheduled components get `Type=oneshot` with no restart policy (the
/// timer drives them); daemons get `Type=simple` with the configured
/// restart behavior. `home_dir` seeds the unit's `PATH=` so user-installed
/// tools resolve at runtime.
#[must_use]
pub fn generate_unit(
    name: &str,
    deployed: &DeployedComponent,
    sd: Option<&SystemdSpec>,
    home_dir: &Path,
) -> String {
    let description = deployed.description.as_deref().unwrap_or(name);
    let exec_start = deployed.run_cmd.join(" ");
    let after = sd
        .filter(|sd| !sd.after.is_empty())
        .map_or_else(|| "network.target".to_owned(), |sd| sd.after.join(" "));
    let wanted_by = sd.map_or_else(
        || "default.target".to_owned(),
        |sd| sd.wanted_by.join(" "),
    );

    let mut lines = vec![
        "[Unit]".to_owned(),
        format!("Description=Castle: {description}"),
        format!("After={after}"),
    ];
    if let Some(sd) = sd {
        if !sd.requires.is_empty() {
            lines.push(format!("Requires={}", sd.requires.join(" ")));
        }
    }
    lines.push(String::new());
    lines.push("[Service]".to_owned());

    let scheduled = deployed.schedule.is_some();
    lines.push(if scheduled {
        "Type=oneshot".to_owned()
    } else {
        "Type=simple".to_owned()
    });
    lines.push(format!("ExecStart={exec_start}"));

    for (key, value) in &deployed.env {
        lines.push(format!("Environment={key}={value}"));
    }
    lines.push(format!(
        "Environment=\"PATH={}/.local/bin:/usr/local/bin:/usr/bin:/bin\"",
        home_dir.display()
    ));

    if !scheduled {
        let restart = sd.map_or(RestartPolicy::OnFailure, |sd| sd.restart);
        let restart_sec = sd.map_or(2, |sd| sd.restart_sec);
        lines.push(format!("Restart={}", restart.as_systemd()));
        lines.push(format!("RestartSec={restart_sec}"));
        // 143 = SIGTERM exit; a clean stop is not a failure.
        lines.push("SuccessExitStatus=143".to_owned());
    }

    if let Some(exec_reload) = sd.and_then(|sd| sd.exec_reload.as_deref()) {
        let mut argv: Vec<String> = exec_reload.split_whitespace().map(str::to_owned).collect();
        if let Some(first) = argv.first_mut() {
            if let Ok(resolved) = which::which(&*first) {
                *first = resolved.display().to_string();
            }
        }
        lines.push(format!("ExecReload={}", argv.join(" ")));
    }

    if sd.is_none_or(|sd| sd.no_new_privileges) {
        lines.push("NoNewPrivileges=true".to_owned());
    }

    lines.push(String::new());
    lines.push("[Install]".to_owned());
    lines.push(format!("WantedBy={wanted_by}"));
    lines.push(String::new());

    lines.join("\n")
}

/// Generate a systemd timer unit for a scheduled component.
#[must_use]
pub fn generate_timer(name: &str, description: Option<&str>, schedule: &str) -> String {
    let description = description.unwrap_or(name);

    let trigger = if let Some(on_calendar) = cron_to_oncalendar(schedule) {
        vec![format!("OnCalendar={on_calendar}")]
    } else if let Some(interval) = cron_to_interval_sec(schedule) {
        vec!["OnBootSec=60".to_owned(), format!("OnUnitActiveSec={interval}s")]
    } else {
        vec!["OnBootSec=60".to_owned(), "OnUnitActiveSec=300".to_owned()]
    };

    let mut lines = vec![
        "[Unit]".to_owned(),
        format!("Description=Castle timer: {description}"),
        String::new(),
        "[Timer]".to_owned(),
    ];
    lines.extend(trigger);
    lines.push("Persistent=false".to_owned());
    lines.push(String::new());
    lines.push("[Install]".to_owned());
    lines.push("WantedBy=timers.target".to_owned());
    lines.push(String::new());

    lines.join("\n")
}
