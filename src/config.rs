//! Configuration for the TLS MQTT connection manager
//!
//! [`ConnectionConfig`] is an immutable value describing one broker endpoint
//! and its credential paths. Updates replace it wholesale; change
//! notifications are derived by comparing the old and new values field by
//! field. [`ClientSettings`] wraps it together with the reconnect and TLS
//! policy sections for loading from a TOML file.

use crate::tls::credentials::KeyFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Default port for MQTT over TLS
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default delay between a disconnect and the next reconnect attempt
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Keep-alive interval sent in every CONNECT
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Broker endpoint, identity and credential file locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host_name")]
    pub host_name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty means a fresh random identifier is generated on each connect
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Environment variable holding the password, resolved at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
}

fn default_host_name() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_TLS_PORT
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            port: default_port(),
            client_id: String::new(),
            username: None,
            password: None,
            password_env: None,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

/// Names a single field of [`ConnectionConfig`] in change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    HostName,
    Port,
    ClientId,
    Username,
    Password,
    CaCertPath,
    ClientCertPath,
    ClientKeyPath,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostName => "hostName",
            Self::Port => "port",
            Self::ClientId => "clientId",
            Self::Username => "username",
            Self::Password => "password",
            Self::CaCertPath => "caCertPath",
            Self::ClientCertPath => "clientCertPath",
            Self::ClientKeyPath => "clientKeyPath",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectionConfig {
    /// Build a config from a broker URL such as `mqtts://broker.local:8883`
    ///
    /// Only encrypted schemes (`mqtts`, `ssl`, `tls`) are accepted.
    pub fn from_broker_url(broker_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(format!("{broker_url}: {e}")))?;

        match url.scheme() {
            "mqtts" | "ssl" | "tls" => {}
            other => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "unsupported scheme '{other}', only mqtts://, ssl:// and tls:// are allowed"
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(format!("{broker_url}: missing host")))?;

        Ok(Self {
            host_name: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_TLS_PORT),
            ..Self::default()
        })
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn with_client_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Client identifier for the next attempt, generating one when unset
    pub fn resolve_client_id(&self) -> String {
        if self.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.client_id.clone()
        }
    }

    /// Fields whose values differ between `self` and `other`, in declaration order
    pub fn changed_fields(&self, other: &ConnectionConfig) -> Vec<ConfigField> {
        let mut changed = Vec::new();
        if self.host_name != other.host_name {
            changed.push(ConfigField::HostName);
        }
        if self.port != other.port {
            changed.push(ConfigField::Port);
        }
        if self.client_id != other.client_id {
            changed.push(ConfigField::ClientId);
        }
        if self.username != other.username {
            changed.push(ConfigField::Username);
        }
        if self.password != other.password {
            changed.push(ConfigField::Password);
        }
        if self.ca_cert_path != other.ca_cert_path {
            changed.push(ConfigField::CaCertPath);
        }
        if self.client_cert_path != other.client_cert_path {
            changed.push(ConfigField::ClientCertPath);
        }
        if self.client_key_path != other.client_key_path {
            changed.push(ConfigField::ClientKeyPath);
        }
        changed
    }

    /// Configured CA path, treating an empty string as unset
    pub fn ca_path(&self) -> Option<&Path> {
        non_empty_path(self.ca_cert_path.as_deref())
    }

    pub fn client_cert_path(&self) -> Option<&Path> {
        non_empty_path(self.client_cert_path.as_deref())
    }

    pub fn client_key_path(&self) -> Option<&Path> {
        non_empty_path(self.client_key_path.as_deref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host_name must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be in 1..=65535".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// `[reconnect]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectSection {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub interval_ms: u64,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl ReconnectSection {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// `[tls]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsSection {
    /// Order in which private key formats are probed
    #[serde(default = "default_key_formats")]
    pub key_formats: Vec<KeyFormat>,
}

fn default_key_formats() -> Vec<KeyFormat> {
    vec![KeyFormat::Rsa, KeyFormat::Ec, KeyFormat::Dsa]
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            key_formats: default_key_formats(),
        }
    }
}

/// Complete client settings as loaded from a TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSettings {
    #[serde(default)]
    pub broker: ConnectionConfig,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub tls: TlsSection,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientSettings {
    /// Load settings from a TOML file, resolving environment references
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut settings: ClientSettings = toml::from_str(content)?;
        settings.resolve_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(env_name) = &self.broker.password_env {
            let password = Self::get_env_var_required(env_name)?;
            self.broker.password = Some(password);
        }
        Ok(())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;

        if self.reconnect.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.tls.key_formats.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "tls.key_formats must list at least one format".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective settings as TOML; the password is never written
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}
