//! Application configuration
//!
//! Loaded from a TOML file (every field has a default, so an empty file is a
//! valid configuration), then patched by the environment variables the
//! charge point deployments already use: `CSMS_URL`, `CSMS_PORT`, `CP_USER`,
//! `CP_PASS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
    pub security: SecurityConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

/// Listening side of the CSMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_host: String,
    pub ws_port: u16,
    /// Seconds to wait for connections to drain on shutdown
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 9000,
            shutdown_timeout: 10,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Supported subprotocols, most preferred first
    pub subprotocols: Vec<String>,
    /// Heartbeat interval returned in BootNotification replies (seconds)
    pub heartbeat_interval: u16,
    pub call_timeout_secs: u64,
    /// Connectors seeded per session
    pub connector_count: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            subprotocols: vec!["ocpp2.0.1".to_string()],
            heartbeat_interval: 10,
            call_timeout_secs: 30,
            connector_count: 9,
        }
    }
}

impl ProtocolConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// The single identity/secret pair the CSMS accepts.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub username: String,
    pub password: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One simulated charging station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: String,
    pub model: String,
    pub vendor: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

impl StationConfig {
    pub fn new(id: impl Into<String>, model: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            vendor: vendor.into(),
            serial_number: None,
            firmware_version: None,
        }
    }
}

/// Charge point side: where to connect and who to be.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub csms_url: String,
    pub csms_port: u16,
    pub username: String,
    pub password: String,
    pub subprotocol: String,
    pub evse_id: u32,
    pub stations: Vec<StationConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            csms_url: "ws://localhost".to_string(),
            csms_port: 9000,
            username: "user".to_string(),
            password: "pass".to_string(),
            subprotocol: "ocpp2.0.1".to_string(),
            evse_id: 1,
            stations: vec![
                StationConfig::new("CP_1", "Trek", "Edison"),
                StationConfig::new("CP_2", "Drive", "Through"),
            ],
        }
    }
}

impl ClientConfig {
    pub fn station_url(&self, station_id: &str) -> String {
        format!(
            "{}:{}/{}",
            self.csms_url.trim_end_matches('/'),
            self.csms_port,
            station_id
        )
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("csms_url", &self.csms_url)
            .field("csms_port", &self.csms_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("subprotocol", &self.subprotocol)
            .field("evse_id", &self.evse_id)
            .field("stations", &self.stations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `plain` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` and apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Patch client settings from the environment, looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CSMS_URL") {
            self.client.csms_url = url;
        }
        if let Some(port) = lookup("CSMS_PORT") {
            self.client.csms_port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "CSMS_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(user) = lookup("CP_USER") {
            self.client.username = user;
        }
        if let Some(pass) = lookup("CP_PASS") {
            self.client.password = pass;
        }
        Ok(())
    }
}

/// `$CSMS_CONFIG`, else `~/.config/csms-session/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CSMS_CONFIG") {
        return PathBuf::from(path);
    }
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("csms-session")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.server.ws_port, 9000);
        assert_eq!(config.protocol.subprotocols, ["ocpp2.0.1"]);
        assert_eq!(config.protocol.heartbeat_interval, 10);
        assert_eq!(config.protocol.connector_count, 9);
        assert_eq!(config.client.evse_id, 1);
        assert_eq!(
            config.client.stations,
            vec![
                StationConfig::new("CP_1", "Trek", "Edison"),
                StationConfig::new("CP_2", "Drive", "Through"),
            ]
        );
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            ws_port = 9100

            [protocol]
            subprotocols = ["ocpp2.0.1", "ocpp1.6"]

            [[client.stations]]
            id = "CP_9"
            model = "M"
            vendor = "V"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.ws_port, 9100);
        assert_eq!(config.server.ws_host, "0.0.0.0");
        assert_eq!(config.protocol.subprotocols.len(), 2);
        assert_eq!(config.protocol.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.client.stations.len(), 1);
        assert_eq!(config.client.stations[0].id, "CP_9");
        assert_eq!(config.security.username, "user");
    }

    #[test]
    fn invalid_toml_is_rejected() {
        assert!(AppConfig::from_toml("[server\nws_port = 1").is_err());
    }

    #[test]
    fn heartbeat_interval_must_fit_the_wire_type() {
        let config = AppConfig::from_toml("[protocol]\nheartbeat_interval = 300").unwrap();
        assert_eq!(config.protocol.heartbeat_interval, 300u16);

        assert!(AppConfig::from_toml("[protocol]\nheartbeat_interval = -5").is_err());
        assert!(AppConfig::from_toml("[protocol]\nheartbeat_interval = 70000").is_err());
    }

    #[test]
    fn env_overrides_client_settings() {
        let env: HashMap<&str, &str> = [
            ("CSMS_URL", "ws://csms.example"),
            ("CSMS_PORT", "9443"),
            ("CP_USER", "station"),
            ("CP_PASS", "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.client.csms_url, "ws://csms.example");
        assert_eq!(config.client.csms_port, 9443);
        assert_eq!(config.client.username, "station");
        assert_eq!(config.client.password, "s3cret");
        assert_eq!(
            config.client.station_url("CP_1"),
            "ws://csms.example:9443/CP_1"
        );
    }

    #[test]
    fn bad_port_in_env_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "CSMS_PORT").then(|| "ninety".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "CSMS_PORT", .. }));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("csms-session-does-not-exist.toml");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.ws_port, 9000);
    }

    #[test]
    fn secrets_are_not_debug_printed() {
        let config = AppConfig::default();
        let text = format!("{:?}", config);
        assert!(!text.contains("\"pass\""));
        assert!(text.contains("<redacted>"));
    }
}
