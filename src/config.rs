//! Configuration for the Observer Core.
//!
//! A serde-deserializable struct loadable from YAML, with secret-bearing
//! fields marked `#[serde(skip_serializing)]` and sourced from the
//! environment rather than the file when both are present.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to read configuration file {path}: {reason}")]
    IoError { path: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

/// A single ordered redaction rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    Standard,
    Strict,
}

impl Default for PrivacyMode {
    fn default() -> Self {
        PrivacyMode::Standard
    }
}

/// Observer Core configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(rename = "dataDir")]
    pub data_dir: PathBuf,
    #[serde(rename = "maxQueueSize", default = "default_max_queue_size")]
    pub max_queue_size: u64,
    #[serde(rename = "maxClients", default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(rename = "heartbeatIntervalMs", default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(rename = "rotationBytes", default = "default_rotation_bytes")]
    pub rotation_bytes: u64,
    #[serde(rename = "privacyMode", default)]
    pub privacy_mode: PrivacyMode,
    #[serde(rename = "redactionRules", default)]
    pub redaction_rules: Vec<RedactionRuleConfig>,
    /// Bearer token. Never deserialized from a committed config file in
    /// practice — set via `OBSERVER_AUTH_TOKEN` and merged in at load time.
    #[serde(rename = "authToken", default, skip_serializing)]
    pub auth_token: Option<String>,
    #[serde(rename = "allowedOrigins", default)]
    pub allowed_origins: HashSet<String>,
    /// When true, the observer is its own lifecycle authority and reports
    /// `running` even with no runtime controller reachable (see DESIGN.md's
    /// Open Question decision).
    #[serde(default)]
    pub standalone: bool,
    /// Grace period for draining the async writer on shutdown.
    #[serde(rename = "shutdownGraceMs", default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_max_queue_size() -> u64 {
    1000
}
fn default_max_clients() -> usize {
    256
}
fn default_heartbeat_ms() -> u64 {
    15_000
}
fn default_rotation_bytes() -> u64 {
    128 * 1024 * 1024
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_queue_size: default_max_queue_size(),
            max_clients: default_max_clients(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            rotation_bytes: default_rotation_bytes(),
            privacy_mode: PrivacyMode::default(),
            redaction_rules: Vec::new(),
            auth_token: None,
            allowed_origins: HashSet::new(),
            standalone: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ObserverConfig {
    /// Load configuration from a YAML file, then overlay `OBSERVER_AUTH_TOKEN`
    /// from the environment if set (env always wins over the file).
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config: ObserverConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if let Ok(token) = std::env::var("OBSERVER_AUTH_TOKEN") {
            config.auth_token = Some(token);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxQueueSize".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_clients == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxClients".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Normalize an `Origin` header value the way the allowlist compares it:
    /// `protocol//host`, case-folded.
    pub fn origin_key(origin: &str) -> String {
        origin.to_ascii_lowercase()
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return false;
        }
        let key = Self::origin_key(origin);
        self.allowed_origins
            .iter()
            .any(|o| Self::origin_key(o) == key)
    }
}
