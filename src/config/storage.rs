//! Config file loading
//!
//! Default location: `<config_dir>/fleetctl/config.json`. A missing default
//! file yields built-in defaults; a missing explicit `--config` path is an
//! error. `FLEETCTL_*` environment variables are applied last.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::types::{FleetConfig, CONFIG_VERSION};

const APP_DIR: &str = "fleetctl";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine config directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported config version: found {found}, expected at most {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// `<config_dir>/fleetctl`
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoConfigDir)
}

/// `<config_dir>/fleetctl/config.json`
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Load the configuration and apply environment overrides.
pub fn load(explicit: Option<&Path>) -> Result<FleetConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => read_file(path)?,
        None => {
            let path = config_file()?;
            if path.exists() {
                read_file(&path)?
            } else {
                debug!("[config] {} not found, using defaults", path.display());
                FleetConfig::default()
            }
        }
    };

    config.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Read and validate a single config file, without environment overrides.
pub fn read_file(path: &Path) -> Result<FleetConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: FleetConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if config.version > CONFIG_VERSION {
        return Err(ConfigError::VersionMismatch {
            found: config.version,
            expected: CONFIG_VERSION,
        });
    }

    info!("[config] Loaded {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use tempfile::TempDir;

    #[test]
    fn test_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "version": 1,
                "management": {"base_url": "http://127.0.0.1:8080/api"},
                "fleet": {"selector": "edge"},
                "restart": {"wait_seconds": 60}
            }"#,
        )
        .unwrap();

        let config = read_file(&path).unwrap();
        assert_eq!(config.management.base_url.as_deref(), Some("http://127.0.0.1:8080/api"));
        assert_eq!(config.fleet.selector.as_deref(), Some("edge"));
        assert_eq!(config.restart.wait_seconds, 60);
        assert_eq!(config.restart.poll_interval_secs, 5);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"transport": {"type": "telnet"}}"#).unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();
        assert!(matches!(
            read_file(&path),
            Err(ConfigError::VersionMismatch { found: 99, .. })
        ));
    }
}
