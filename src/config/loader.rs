//! Configuration Loader
//!
//! Locates and parses the router configuration file.

use crate::config::settings::RouterConfig;
use crate::error::{RouterError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "LLMROUTE_CONFIG_PATH";

/// Configuration loader with support for multiple locations
pub struct ConfigLoader {
    config: RouterConfig,
    source: PathBuf,
}

impl ConfigLoader {
    /// Load `.env`, then the first config file found in the default locations
    pub fn new() -> Result<Self> {
        // Load .env file if present so api_key_env lookups can see it
        let _ = dotenvy::dotenv();

        let path = Self::get_config_paths()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                RouterError::Config(format!(
                    "No config file found. Set {} or create ./llmroute.json",
                    CONFIG_PATH_ENV
                ))
            })?;

        Self::from_path(path)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::load_from_file(path)?;
        debug!(path = %path.display(), backends = config.backends.len(), "loaded router config");

        Ok(Self {
            config,
            source: path.to_path_buf(),
        })
    }

    /// Get list of config paths to check, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("llmroute.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmroute").join("config.json"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llmroute").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(path: &Path) -> Result<RouterConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            RouterError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Path the configuration was read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> RouterConfig {
        self.config
    }
}
