//! Configuration for forkchat.

use crate::CoreError;
use forkchat_context::ContextBuilder;
use forkchat_tree::{LayoutOptions, SessionStorage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data directory for config and sessions
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Auto layout spacing
    #[serde(default)]
    pub layout: LayoutOptions,

    /// Context rendering limits
    #[serde(default)]
    pub context: ContextConfig,
}

/// Context rendering configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Character budget for rendered context (unlimited when absent)
    #[serde(default)]
    pub max_chars: Option<usize>,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".forkchat")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            layout: LayoutOptions::default(),
            context: ContextConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        Self::load_or_default(&default_data_dir().join("config.yaml"))
    }

    /// Load from `path` if it exists; a bad file is reported and ignored
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load_from(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = ?path, "Ignoring config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Override the data directory (e.g. from the command line)
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    /// Get the sessions directory
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.yaml")
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.sessions_dir())?;
        Ok(())
    }

    /// Session storage rooted at the sessions directory
    pub fn storage(&self) -> SessionStorage {
        SessionStorage::new(self.sessions_dir())
    }

    pub fn context_builder(&self) -> ContextBuilder {
        ContextBuilder::with_limit(self.context.max_chars)
    }
}
