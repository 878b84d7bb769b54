//! Core configuration: gateway defaults, store location, popup sizing.
//!
//! Loaded from `weavegate.toml` in the platform config directory; every
//! field falls back to a default so a missing file is not an error.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Network endpoint used for contract state evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            host: "arweave.net".to_string(),
            port: 443,
            protocol: "https".to_string(),
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Auth popup window dimensions, forwarded to the popup host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupSize {
    pub width: u32,
    pub height: u32,
}

impl Default for PopupSize {
    fn default() -> Self {
        Self {
            width: 385,
            height: 635,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub default_gateway: Gateway,
    /// Override for the store directory; `None` means the platform
    /// config dir.
    pub data_dir: Option<PathBuf>,
    pub popup: PopupSize,
}

impl CoreConfig {
    /// Load the config from the platform config directory, falling back
    /// to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(config_dir) = dirs::config_dir() else {
            log::warn!("No config dir on this platform; using default config");
            return Ok(Self::default());
        };
        Self::load_from(config_dir.join("weavegate").join("weavegate.toml"))
    }

    /// Load the config from an explicit path. A missing file yields the
    /// default config; a malformed file is an error.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Directory the file-backed store lives in.
    pub fn store_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Some(dir.clone());
        }
        dirs::config_dir().map(|dir| dir.join("weavegate"))
    }
}
