//! Runtime settings, read once from the environment at startup.

/// Daemon settings (`CASTLE_API_*`, `CASTLE_MQTT_*`, `CASTLE_MDNS_*`).
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Whether the mesh coordinator runs.
    pub mqtt_enabled: bool,
    /// Broker host.
    pub mqtt_host: String,
    /// Broker port.
    pub mqtt_port: u16,
    /// Whether mDNS advertisement/browsing runs.
    pub mdns_enabled: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9020,
            mqtt_enabled: true,
            mqtt_host: "localhost".to_owned(),
            mqtt_port: 1883,
            mdns_enabled: true,
        }
    }
}

impl ApiSettings {
    /// Read settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("CASTLE_API_HOST").unwrap_or(defaults.host),
            port: env_parse("CASTLE_API_PORT").unwrap_or(defaults.port),
            mqtt_enabled: env_bool("CASTLE_MQTT_ENABLED").unwrap_or(defaults.mqtt_enabled),
            mqtt_host: env_string("CASTLE_MQTT_HOST").unwrap_or(defaults.mqtt_host),
            mqtt_port: env_parse("CASTLE_MQTT_PORT").unwrap_or(defaults.mqtt_port),
            mdns_enabled: env_bool("CASTLE_MDNS_ENABLED").unwrap_or(defaults.mdns_enabled),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.parse().ok()
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env_string(key)?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ApiSettings::default();
        assert_eq!(settings.port, 9020);
        assert_eq!(settings.mqtt_port, 1883);
        assert!(settings.mqtt_enabled);
        assert!(settings.mdns_enabled);
    }
}
