//! The `~/.castle` runtime directory layout.
//!
//! All compiled state lives under a single home directory:
//!
//! ```text
//! ~/.castle/                      (CastleHome)
//! ├── registry.yaml                 (compiled node registry)
//! ├── generated/
//! │   └── Caddyfile                 (gateway config)
//! ├── secrets/                      (one flat file per secret, 0700 dir)
//! └── static/
//!     └── <component>/              (copied frontend build outputs)
//! ```
//!
//! Systemd units are the one artifact written elsewhere, under
//! `~/.config/systemd/user/`, where the user instance expects them.

use std::io;
use std::path::{Path, PathBuf};

/// The Castle home directory (`~/.castle/` or `$CASTLE_HOME`).
#[derive(Debug, Clone)]
pub struct CastleHome {
    root: PathBuf,
}

impl CastleHome {
    /// Resolve the home directory.
    ///
    /// Checks `$CASTLE_HOME` first, then falls back to `$HOME/.castle/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$CASTLE_HOME` is relative, or neither
    /// `$CASTLE_HOME` nor `$HOME` is set.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("CASTLE_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "CASTLE_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither CASTLE_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".castle")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists.
    ///
    /// Creates `generated/`, `secrets/`, and `static/`; the secrets
    /// directory is restricted to `0o700` on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.generated_dir())?;
        std::fs::create_dir_all(self.secrets_dir())?;
        std::fs::create_dir_all(self.static_dir())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(self.secrets_dir(), perms)?;
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the compiled node registry (`~/.castle/registry.yaml`).
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.yaml")
    }

    /// Generated artifacts directory (`~/.castle/generated/`).
    #[must_use]
    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    /// Path to the generated gateway config (`~/.castle/generated/Caddyfile`).
    #[must_use]
    pub fn caddyfile_path(&self) -> PathBuf {
        self.generated_dir().join("Caddyfile")
    }

    /// Secrets directory (`~/.castle/secrets/`).
    #[must_use]
    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    /// Static bundles directory (`~/.castle/static/`).
    #[must_use]
    pub fn static_dir(&self) -> PathBuf {
        self.root.join("static")
    }

    /// Static bundle directory for one component.
    #[must_use]
    pub fn static_bundle_dir(&self, component: &str) -> PathBuf {
        self.static_dir().join(component)
    }
}

/// The systemd user unit directory (`~/.config/systemd/user/`).
///
/// # Errors
///
/// Returns an error if `$HOME` is not set.
pub fn systemd_user_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| {
        io::Error::new(io::ErrorKind::NotFound, "HOME environment variable is not set")
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("systemd")
        .join("user"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_accessors() {
        let home = CastleHome::from_path("/tmp/test-castle");
        assert_eq!(home.root(), Path::new("/tmp/test-castle"));
        assert_eq!(
            home.registry_path(),
            PathBuf::from("/tmp/test-castle/registry.yaml")
        );
        assert_eq!(
            home.caddyfile_path(),
            PathBuf::from("/tmp/test-castle/generated/Caddyfile")
        );
        assert_eq!(
            home.secrets_dir(),
            PathBuf::from("/tmp/test-castle/secrets")
        );
        assert_eq!(
            home.static_bundle_dir("castle-app"),
            PathBuf::from("/tmp/test-castle/static/castle-app")
        );
    }

    #[test]
    fn test_ensure_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let home = CastleHome::from_path(dir.path().join("castle"));
        home.ensure().unwrap();

        assert!(home.generated_dir().is_dir());
        assert!(home.secrets_dir().is_dir());
        assert!(home.static_dir().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_restricts_secrets_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let home = CastleHome::from_path(dir.path().join("castle"));
        home.ensure().unwrap();

        let perms = std::fs::metadata(home.secrets_dir()).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o700);
    }
}
