//! Server configuration file (`pushtart.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Process-wide settings, loaded once at startup and handed to every
/// component that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Display name of this server.
    pub name: String,
    /// Root for the tart store, logs and bare repositories.
    pub data_path: PathBuf,
    /// Root under which each tart's tree is checked out.
    pub deployment_path: PathBuf,
    /// Seconds between sentry ticks. Zero or negative disables the sentry.
    pub run_sentry_interval: i64,
    /// Seconds a stopping tart gets between SIGTERM and SIGKILL.
    pub stop_grace_secs: u64,
    /// Script, relative to the deployment directory, that runs the tart.
    pub startup_script: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "pushtart".to_string(),
            data_path: PathBuf::from("data"),
            deployment_path: PathBuf::from("deployments"),
            run_sentry_interval: 10,
            stop_grace_secs: 10,
            startup_script: "startup.sh".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config at `path`, writing a default one first if none exists.
    pub fn load_or_generate(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!(?path, "generated default configuration");
        Ok(config)
    }

    /// The sentry tick interval, or `None` when the sentry is disabled.
    pub fn sentry_interval(&self) -> Option<Duration> {
        u64::try_from(self.run_sentry_interval)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("tarts.redb")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_path.join("repos")
    }

    /// Unix socket on which the daemon accepts console commands.
    pub fn console_socket(&self) -> PathBuf {
        self.data_path.join("tartd.sock")
    }
}
