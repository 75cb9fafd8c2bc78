//! Secret storage and `${secret:NAME}` resolution.
//!
//! Secrets are flat files under `~/.castle/secrets/`, one value per file,
//! trimmed on read. Resolution never fails: a missing secret substitutes a
//! visible `<MISSING_SECRET:NAME>` placeholder so a compile always
//! completes and the operator can see exactly what is absent.

use std::io;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::manifest::EnvMap;

/// `${...}` references inside env values.
static REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|_| unreachable!()));

/// Resolve `${secret:NAME}` references in every value of `env`.
///
/// Other `${...}` forms are left untouched; a missing secret becomes
/// [`missing_placeholder`] rather than an error.
#[must_use]
pub fn resolve_env(env: &EnvMap, secrets_dir: &Path) -> EnvMap {
    env.iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, secrets_dir)))
        .collect()
}

/// Resolve `${secret:NAME}` references in a single value.
#[must_use]
pub fn resolve_value(value: &str, secrets_dir: &Path) -> String {
    REF_RE
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let reference = &caps[1];
            match reference.strip_prefix("secret:") {
                Some(name) => read_secret(secrets_dir, name).unwrap_or_else(|| {
                    warn!(secret = name, "missing secret, substituting placeholder");
                    missing_placeholder(name)
                }),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}

/// The placeholder substituted for a missing secret.
#[must_use]
pub fn missing_placeholder(name: &str) -> String {
    format!("<MISSING_SECRET:{name}>")
}

/// Read a secret value, trimmed. Returns `None` if the file is absent or
/// unreadable.
#[must_use]
pub fn read_secret(secrets_dir: &Path, name: &str) -> Option<String> {
    if !is_valid_secret_name(name) {
        return None;
    }
    std::fs::read_to_string(secrets_dir.join(name))
        .ok()
        .map(|s| s.trim().to_owned())
}

/// Write a secret value (trimmed, newline-terminated).
///
/// # Errors
///
/// Returns an error if the name is invalid or the write fails.
pub fn write_secret(secrets_dir: &Path, name: &str, value: &str) -> io::Result<()> {
    if !is_valid_secret_name(name) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid secret name: {name}"),
        ));
    }
    std::fs::create_dir_all(secrets_dir)?;
    let path = secrets_dir.join(name);
    std::fs::write(&path, format!("{}\n", value.trim()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Delete a secret. Deleting a nonexistent secret is not an error.
///
/// # Errors
///
/// Returns an error if the name is invalid or the unlink fails.
pub fn delete_secret(secrets_dir: &Path, name: &str) -> io::Result<()> {
    if !is_valid_secret_name(name) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid secret name: {name}"),
        ));
    }
    match std::fs::remove_file(secrets_dir.join(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// List secret names (never values), sorted.
#[must_use]
pub fn list_secrets(secrets_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(secrets_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Secret names must not traverse out of the secrets directory.
#[must_use]
pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_resolve_present_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("API_KEY"), "xyz\n").unwrap();

        let resolved = resolve_env(
            &env(&[("K", "${secret:API_KEY}"), ("Z", "${secret:NOPE}")]),
            dir.path(),
        );
        assert_eq!(resolved["K"], "xyz");
        assert_eq!(resolved["Z"], "<MISSING_SECRET:NOPE>");
    }

    #[test]
    fn test_resolve_embedded_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("TOKEN"), "abc").unwrap();

        let resolved = resolve_value("Bearer ${secret:TOKEN} end", dir.path());
        assert_eq!(resolved, "Bearer abc end");
    }

    #[test]
    fn test_non_secret_references_untouched() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_value("${HOME}/bin", dir.path()), "${HOME}/bin");
    }

    #[test]
    fn test_read_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PAD"), "  spaced \n\n").unwrap();
        assert_eq!(read_secret(dir.path(), "PAD").as_deref(), Some("spaced"));
    }

    #[test]
    fn test_write_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        write_secret(dir.path(), "B_KEY", "two").unwrap();
        write_secret(dir.path(), "A_KEY", "one").unwrap();
        assert_eq!(list_secrets(dir.path()), vec!["A_KEY", "B_KEY"]);

        delete_secret(dir.path(), "A_KEY").unwrap();
        delete_secret(dir.path(), "A_KEY").unwrap(); // idempotent
        assert_eq!(list_secrets(dir.path()), vec!["B_KEY"]);
    }

    #[test]
    fn test_traversal_names_rejected() {
        assert!(!is_valid_secret_name("../etc/passwd"));
        assert!(!is_valid_secret_name("a/b"));
        assert!(!is_valid_secret_name(""));
        assert!(is_valid_secret_name("API_KEY"));

        let dir = tempfile::tempdir().unwrap();
        assert!(write_secret(dir.path(), "../oops", "x").is_err());
        assert_eq!(read_secret(dir.path(), "../oops"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_written_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write_secret(dir.path(), "KEY", "v").unwrap();
        let mode = std::fs::metadata(dir.path().join("KEY"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
