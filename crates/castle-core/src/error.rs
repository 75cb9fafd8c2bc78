//! Error types for the Castle core pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, compiling, or projecting the catalog.
#[derive(Debug, Error)]
pub enum CastleError {
    /// The catalog failed to parse or validate.
    ///
    /// Carries one entry per offending key so callers can report all
    /// problems at once instead of stopping at the first.
    #[error("invalid catalog: {}", .errors.join("; "))]
    InvalidCatalog {
        /// One message per offending key path.
        errors: Vec<String>,
    },

    /// An id collides across the program/service/job namespaces.
    #[error("duplicate id across programs/services/jobs: {0}")]
    DuplicateId(String),

    /// A named entity does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up ("program", "service", "job", "component").
        kind: &'static str,
        /// The id that was not found.
        name: String,
    },

    /// The catalog repository is not reachable on this node.
    #[error("castle repo not available on this node")]
    RepoUnavailable,

    /// Filesystem I/O failed; carries the path that failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// The path the operation failed on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization failed; carries the path that failed.
    #[error("failed to parse {}: {source}", .path.display())]
    Yaml {
        /// The file being parsed or written.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_yaml::Error,
    },
}

impl CastleError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a YAML error with the file it occurred on.
    pub fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            source,
        }
    }

    /// Build an [`CastleError::InvalidCatalog`] from a single message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            errors: vec![message.into()],
        }
    }
}

/// Result type for core operations.
pub type CastleResult<T> = Result<T, CastleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_catalog_display_joins_errors() {
        let err = CastleError::InvalidCatalog {
            errors: vec!["services.a: bad port".into(), "jobs.b: bad cron".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid catalog: services.a: bad port; jobs.b: bad cron"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = CastleError::NotFound {
            kind: "service",
            name: "api".into(),
        };
        assert_eq!(err.to_string(), "service 'api' not found");
    }

    #[test]
    fn test_io_carries_path() {
        let err = CastleError::io(
            "/tmp/x.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/x.yaml"));
    }
}
