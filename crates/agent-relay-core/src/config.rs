//! Relay configuration loaded from TOML.

use std::{
    collections::HashMap,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8893)),
        }
    }
}

/// Where and how to look for the host's inspection targets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Loopback ports queried for a target list, in order.
    pub ports: Vec<u16>,
    /// Path of the target-list endpoint.
    pub path: String,
    /// Substring expected in the host window title.
    pub product_name: String,
    /// Exact connect address to prefer over every other match.
    pub known_address: Option<String>,
    /// URL fragment identifying the host's main document.
    pub main_document: String,
    /// Per-port timeout for the target-list request.
    pub request_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ports: vec![9000, 9222, 9229],
            path: "/json/list".into(),
            product_name: "Antigravity".into(),
            known_address: None,
            main_document: "workbench.html".into(),
            request_timeout_ms: 2_000,
        }
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub reconnect_delay_ms: u64,
    /// Domains enabled right after the socket opens (`<Domain>.enable`).
    pub enable_domains: Vec<String>,
}

impl ConnectionConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            enable_domains: vec!["Runtime".into()],
        }
    }
}

/// Context prober settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProberConfig {
    pub probe_timeout_ms: u64,
    pub action_timeout_ms: u64,
    pub sweeps: u32,
    pub sweep_pause_ms: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1_500,
            action_timeout_ms: 15_000,
            sweeps: 3,
            sweep_pause_ms: 900,
        }
    }
}

/// Action queue settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub tick_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
        }
    }
}

/// Delegation supervisor settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelegationConfig {
    pub default_timeout_ms: u64,
    /// Pause between focusing the target and switching its model.
    pub settle_delay_ms: u64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
            settle_delay_ms: 500,
        }
    }
}

/// Script sources for one capability.
///
/// Both are function sources taking one JSON argument: `probe` must return a
/// boolean, `action` must return (or resolve to) `{ ok, reason?, ... }`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CapabilityScript {
    pub probe: String,
    pub action: String,
}

/// Capability names the relay looks up.
pub mod capability {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const FOCUS_TARGET: &str = "focus_target";
    pub const SWITCH_MODEL: &str = "switch_model";
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub state_path: PathBuf,
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub connection: ConnectionConfig,
    pub prober: ProberConfig,
    pub queue: QueueConfig,
    pub delegation: DelegationConfig,
    pub capabilities: HashMap<String, CapabilityScript>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("relay-state.json"),
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            connection: ConnectionConfig::default(),
            prober: ProberConfig::default(),
            queue: QueueConfig::default(),
            delegation: DelegationConfig::default(),
            capabilities: HashMap::new(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file; a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read, parsed or validated.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Script for a named capability, if configured.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&CapabilityScript> {
        self.capabilities.get(name)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.queue.tick_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.ports.is_empty() {
            return Err(ConfigError::Invalid("discovery.ports must not be empty".into()));
        }
        if self.prober.sweeps == 0 {
            return Err(ConfigError::Invalid("prober.sweeps must be at least 1".into()));
        }
        if self.queue.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "queue.tick_interval_ms must be greater than zero".into(),
            ));
        }
        for name in [
            capability::SEND_MESSAGE,
            capability::FOCUS_TARGET,
            capability::SWITCH_MODEL,
        ] {
            if !self.capabilities.contains_key(name) {
                tracing::warn!(capability = name, "Capability not configured; it will never match");
            }
        }
        Ok(())
    }
}
