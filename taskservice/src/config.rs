//! taskservice configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::server::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS_PER_CPU, ServerOptions};

/// Main taskservice configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dispatch runtime defaults
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskservice.yml
        let local_config = PathBuf::from(".taskservice.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskservice/taskservice.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskservice").join("taskservice.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Defaults applied to registries and the servers they create
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Message workers per logical CPU for non-coalescing servers
    #[serde(rename = "workers-per-cpu")]
    pub workers_per_cpu: usize,

    /// Queue bound for servers created without explicit options
    #[serde(rename = "default-queue-capacity")]
    pub default_queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers_per_cpu: DEFAULT_WORKERS_PER_CPU,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DispatchConfig {
    /// Server options seeded from these defaults
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::default().with_queue_capacity(self.default_queue_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dispatch.workers_per_cpu, 2);
        assert_eq!(config.dispatch.default_queue_capacity, 4096);
        assert_eq!(config.dispatch.server_options(), ServerOptions::default());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dispatch:\n  workers-per-cpu: 4\n  default-queue-capacity: 16").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.dispatch.workers_per_cpu, 4);
        assert_eq!(config.dispatch.server_options().queue_capacity, 16);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "dispatch:\n  workers-per-cpu: 1").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.dispatch.workers_per_cpu, 1);
        assert_eq!(config.dispatch.default_queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let path = PathBuf::from("/nonexistent/taskservice.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
