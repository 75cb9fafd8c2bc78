//! Error types for mesh coordination.

use thiserror::Error;

/// Errors from the mesh transport layers.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The MQTT client rejected a request (publish, subscribe, disconnect).
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// A peer payload failed to parse.
    #[error("malformed mesh payload: {0}")]
    Parse(#[from] serde_json::Error),

    /// mDNS advertise/browse failed.
    #[error("mdns error: {0}")]
    Discovery(String),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
