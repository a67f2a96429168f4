//! `vs_config` - configuration parsing and validation for the agent
//!
//! This crate provides:
//! - TOML configuration parsing with defaults
//! - Environment variable overrides (`VSCOUT_*`)
//! - Validation with actionable messages

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Agent identity and control-plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Unique id of this agent, reported to the control plane.
    pub id: String,
    /// Id of the source (vCenter) this agent watches.
    pub source_id: String,
    /// Operating mode at first boot; a persisted mode wins afterwards.
    pub mode: String,
    /// Control-plane base URL.
    pub console_url: String,
    /// Seconds between control-plane updates in connected mode.
    pub update_interval_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            source_id: String::new(),
            mode: "disconnected".to_string(),
            console_url: String::new(),
            update_interval_secs: 5,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3333,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/vscout.duckdb"),
        }
    }
}

/// vSphere connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VsphereSection {
    /// Accept self-signed certificates.
    pub insecure_skip_verify: bool,
}

impl Default for VsphereSection {
    fn default() -> Self {
        Self {
            insecure_skip_verify: true,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub web: WebSection,
    pub store: StoreSection,
    pub vsphere: VsphereSection,
}

impl AgentConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env();
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(id) = std::env::var("VSCOUT_AGENT_ID") {
            self.agent.id = id;
        }
        if let Ok(source_id) = std::env::var("VSCOUT_SOURCE_ID") {
            self.agent.source_id = source_id;
        }
        if let Ok(mode) = std::env::var("VSCOUT_MODE") {
            self.agent.mode = mode;
        }
        if let Ok(url) = std::env::var("VSCOUT_CONSOLE_URL") {
            self.agent.console_url = url;
        }
        if let Ok(interval) = std::env::var("VSCOUT_UPDATE_INTERVAL") {
            if let Ok(secs) = interval.trim_end_matches('s').parse() {
                self.agent.update_interval_secs = secs;
            }
        }
        if let Ok(addr) = std::env::var("VSCOUT_BIND_ADDRESS") {
            self.web.bind_address = addr;
        }
        if let Ok(port) = std::env::var("VSCOUT_PORT") {
            if let Ok(port) = port.parse() {
                self.web.port = port;
            }
        }
        if let Ok(path) = std::env::var("VSCOUT_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.agent.mode.as_str() {
            "connected" | "disconnected" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "agent.mode must be connected or disconnected, got {other:?}"
                )));
            }
        }
        if self.agent.mode == "connected" && self.agent.console_url.is_empty() {
            return Err(ConfigError::Invalid(
                "agent.console_url is required in connected mode".to_string(),
            ));
        }
        if self.agent.update_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent.update_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Update interval as a [`Duration`].
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.agent.update_interval_secs)
    }
}
