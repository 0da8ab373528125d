//! Configuration Types
//!
//! `FleetConfig` is the root of `config.json`. Every field has a default, so
//! an empty object (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::exec::{
    ExecutionOptions, HostKeyPolicy, DEFAULT_CONCURRENCY, DEFAULT_ORCHESTRATOR_PROGRAM,
};

/// Current configuration version
pub const CONFIG_VERSION: u32 = 1;

/// Default per-call timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default restart instruction
pub const DEFAULT_RESTART_COMMAND: &str = "sudo systemctl restart fleet-agent";

fn default_port() -> u16 {
    22
}

fn default_program() -> String {
    DEFAULT_ORCHESTRATOR_PROGRAM.to_string()
}

/// Management-plane API used for discovery and health reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub base_url: Option<String>,
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            request_timeout_secs: 10,
        }
    }
}

/// Which endpoints make up the fleet when none are listed explicitly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSection {
    pub selector: Option<String>,
}

/// Remote execution transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Key-based SSH
    Ssh {
        /// Default user for endpoints given without `user@`
        #[serde(default)]
        user: Option<String>,
        /// Path to private key file
        #[serde(default)]
        key_path: Option<String>,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        host_key_policy: HostKeyPolicy,
        /// Name of the environment variable holding the key passphrase (if any)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_passphrase_env: Option<String>,
    },
    /// Orchestrator CLI exec (`kubectl exec` style)
    Orchestrator {
        #[serde(default = "default_program")]
        program: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        base_args: Vec<String>,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        container: Option<String>,
        #[serde(default)]
        kubeconfig: Option<String>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Ssh {
            user: None,
            key_path: None,
            port: default_port(),
            host_key_policy: HostKeyPolicy::default(),
            key_passphrase_env: None,
        }
    }
}

/// Per-call and per-batch limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_ms: u64,
    pub concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Restart-and-wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub command: String,
    pub wait_seconds: u64,
    pub poll_interval_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_RESTART_COMMAND.to_string(),
            wait_seconds: 120,
            poll_interval_secs: 5,
        }
    }
}

/// Root configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Configuration version
    pub version: u32,
    pub management: ManagementConfig,
    pub fleet: FleetSection,
    pub transport: TransportConfig,
    pub execution: ExecutionConfig,
    pub restart: RestartConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            management: ManagementConfig::default(),
            fleet: FleetSection::default(),
            transport: TransportConfig::default(),
            execution: ExecutionConfig::default(),
            restart: RestartConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Fill in `ExecutionOptions` for the configured transport.
    pub fn execution_options(&self) -> ExecutionOptions {
        let (credential_ref, port, container_ref) = match &self.transport {
            TransportConfig::Ssh { key_path, port, .. } => (key_path.clone(), *port, None),
            TransportConfig::Orchestrator {
                kubeconfig,
                container,
                ..
            } => (kubeconfig.clone(), default_port(), container.clone()),
        };

        ExecutionOptions {
            credential_ref,
            port,
            timeout_ms: self.execution.timeout_ms,
            concurrency: self.execution.concurrency.max(1),
            container_ref,
        }
    }

    /// Apply `FLEETCTL_*` overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("FLEETCTL_API_URL") {
            self.management.base_url = Some(url);
        }
        if let Some(token) = non_empty("FLEETCTL_API_TOKEN") {
            self.management.token = Some(token);
        }
        if let Some(selector) = non_empty("FLEETCTL_FLEET") {
            self.fleet.selector = Some(selector);
        }
        if let Some(key) = non_empty("FLEETCTL_SSH_KEY") {
            if let TransportConfig::Ssh { key_path, .. } = &mut self.transport {
                *key_path = Some(key);
            }
        }
    }
}
