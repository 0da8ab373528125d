//! Configuration Module
//!
//! JSON config file with per-section defaults, plus `FLEETCTL_*`
//! environment overrides:
//!
//! - `FLEETCTL_API_URL`: management API base URL
//! - `FLEETCTL_API_TOKEN`: management API bearer token
//! - `FLEETCTL_FLEET`: fleet selector used for discovery
//! - `FLEETCTL_SSH_KEY`: SSH private key path

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, load, read_file, ConfigError};
pub use types::{
    ExecutionConfig, FleetConfig, FleetSection, ManagementConfig, RestartConfig, TransportConfig,
    CONFIG_VERSION, DEFAULT_RESTART_COMMAND, DEFAULT_TIMEOUT_MS,
};
