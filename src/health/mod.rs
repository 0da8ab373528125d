//! Endpoint Health & Discovery
//!
//! The capabilities the fleet core consumes from the management plane:
//! - [`HealthSource`]: read one endpoint's heartbeat + status
//! - [`EndpointDirectory`]: list endpoint ids matching a fleet selector
//!
//! [`ManagementClient`] implements both over HTTP.

mod client;
mod error;

pub use client::ManagementClient;
pub use error::ManagementError;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Decoded endpoint status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Disconnected,
    Unknown,
}

impl HealthStatus {
    /// Map a wire label onto a status. Only the exact (case-insensitive)
    /// labels are recognised; anything else, including look-alikes such as
    /// `running`, is `Unknown` and can never satisfy the convergence check.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "degraded" => Self::Degraded,
            "unhealthy" => Self::Unhealthy,
            "disconnected" => Self::Disconnected,
            _ => Self::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for HealthStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One health reading for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHealthSnapshot {
    pub endpoint_id: String,
    /// Agent heartbeat, seconds since the epoch
    pub heartbeat_timestamp: i64,
    pub status: HealthStatus,
}

impl EndpointHealthSnapshot {
    pub fn new(endpoint_id: impl Into<String>, heartbeat_timestamp: i64, status: HealthStatus) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            heartbeat_timestamp,
            status,
        }
    }

    /// Stand-in baseline for an endpoint whose health could not be read.
    pub fn never_observed(endpoint_id: impl Into<String>) -> Self {
        Self::new(endpoint_id, 0, HealthStatus::Unknown)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Read access to endpoint health. Must be cheap and safe to call repeatedly.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn get_health(&self, endpoint_id: &str) -> Result<EndpointHealthSnapshot, ManagementError>;
}

/// Endpoint discovery by fleet selector.
#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    async fn list_endpoints(&self, selector: &str) -> Result<Vec<String>, ManagementError>;
}
