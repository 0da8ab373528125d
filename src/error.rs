//! Top-level fleet operation errors.
//!
//! Per-endpoint failures never show up here: they are carried in
//! `CommandResult` / `RestartSummary`. These errors stop a whole operation
//! before (or instead of) contacting endpoints.

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::convergence::PhaseTransitionError;
use crate::health::ManagementError;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Endpoint discovery failed for '{selector}': {source}")]
    Discovery {
        selector: String,
        #[source]
        source: ManagementError,
    },

    #[error("No target endpoints: {0}")]
    NoTargets(String),

    #[error("Management API error: {0}")]
    Management(#[from] ManagementError),

    #[error("Convergence tracking failed: {0}")]
    Convergence(#[from] PhaseTransitionError),
}

impl FleetError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl Serialize for FleetError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
