//! Player Settings
//!
//! Stored as pretty JSON at `<config dir>/AstraPlay/config.json`. Every field
//! has a default, so partial files and missing files both load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::error::ConfigError;
use crate::tools::ToolsConfig;

/// How engine errors reach the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Every engine error becomes a user-visible event
    #[default]
    Notify,
    /// Engine errors are only logged (batch / automated use)
    LogOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub engine: EngineOptions,
    pub tools: ToolsConfig,
    pub error_policy: ErrorPolicy,
    /// Synchronizer cadence; 0 disables the background poller
    pub poll_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            tools: ToolsConfig::default(),
            error_policy: ErrorPolicy::Notify,
            poll_interval_ms: 1000,
        }
    }
}

impl PlayerConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        if self.poll_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.poll_interval_ms))
        }
    }

    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn config_file_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("AstraPlay");
    path.push("config.json");
    path
}
