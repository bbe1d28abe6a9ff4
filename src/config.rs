//! Configuration management for webpilot.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8001`.
//! - `AUTH_STORAGE_DIR` - Optional. Per-identity session state root. Defaults to `/storage/auth`.
//! - `DOWNLOADS_DIR` - Optional. Root for reconciled downloads. Defaults to `/home/browseruser/Downloads`.
//! - `CONVERSATIONS_DIR` - Optional. Root for saved conversations. Defaults to `/home/browseruser/.conversations`.
//! - `SCRATCH_ROOT` - Optional. Where the browser driver drops downloads. Defaults to `/tmp`.
//! - `LOG_DIR` - Optional. Directory for the rolling log file. Defaults to `/storage/logs`.
//! - `TASK_RETENTION_SECS` - Optional. How long terminal task records stay queryable. Defaults to `300`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Root directory for per-identity session state files
    pub auth_storage_dir: PathBuf,

    /// Root directory downloads are reconciled into
    pub downloads_dir: PathBuf,

    /// Root directory for saved conversation logs
    pub conversations_dir: PathBuf,

    /// Temp root the browser driver writes downloads under
    pub scratch_root: PathBuf,

    /// Directory for the rolling log file
    pub log_dir: PathBuf,

    /// Retention window for terminal task records
    pub task_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            auth_storage_dir: PathBuf::from("/storage/auth"),
            downloads_dir: PathBuf::from("/home/browseruser/Downloads"),
            conversations_dir: PathBuf::from("/home/browseruser/.conversations"),
            scratch_root: PathBuf::from("/tmp"),
            log_dir: PathBuf::from("/storage/logs"),
            task_retention: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);

        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?,
            Err(_) => defaults.port,
        };

        let task_retention = match std::env::var("TASK_RETENTION_SECS") {
            Ok(v) => {
                let secs = v.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("TASK_RETENTION_SECS".to_string(), e.to_string())
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => defaults.task_retention,
        };

        Ok(Self {
            host,
            port,
            auth_storage_dir: env_path("AUTH_STORAGE_DIR", defaults.auth_storage_dir),
            downloads_dir: env_path("DOWNLOADS_DIR", defaults.downloads_dir),
            conversations_dir: env_path("CONVERSATIONS_DIR", defaults.conversations_dir),
            scratch_root: env_path("SCRATCH_ROOT", defaults.scratch_root),
            log_dir: env_path("LOG_DIR", defaults.log_dir),
            task_retention,
        })
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_container_layout() {
        let config = Config::default();
        assert_eq!(config.port, 8001);
        assert_eq!(config.auth_storage_dir, PathBuf::from("/storage/auth"));
        assert_eq!(config.scratch_root, PathBuf::from("/tmp"));
        assert_eq!(config.task_retention, Duration::from_secs(300));
    }
}
