//! Convergence State Machine
//!
//! One restart-and-wait run moves through these phases:
//!
//! ```text
//! ┌──────┐ baselines ┌──────────────────┐ restart  ┌───────────────────┐
//! │ Init │ ────────► │ BaselineCaptured │ ───────► │ RestartDispatched │
//! └──────┘           └──────────────────┘          └─────────┬─────────┘
//!                                                            │ start_polling()
//!                                                            ▼
//!                                                      ┌──────────┐
//!                                                      │ Polling  │
//!                                                      └────┬─────┘
//!                              ┌──────────────────────┬─────┴────────────────┐
//!                              ▼                      ▼                      ▼
//!                        ┌───────────┐       ┌────────────────┐       ┌───────────┐
//!                        │ Converged │       │ PartialTimeout │       │ Cancelled │
//!                        └───────────┘       └────────────────┘       └───────────┘
//! ```
//!
//! `pending` is seeded from the endpoints whose restart command succeeded and
//! only ever shrinks. Every endpoint ends up in at most one of
//! {reregistered, pending, restart_failed}.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::exec::CommandResult;
use crate::health::EndpointHealthSnapshot;

/// Phases of a convergence run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergencePhase {
    #[default]
    Init,
    BaselineCaptured,
    RestartDispatched,
    Polling,
    /// Nothing left pending
    Converged,
    /// Deadline passed with endpoints still pending
    PartialTimeout,
    /// Caller cancelled the run
    Cancelled,
}

impl ConvergencePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Converged | Self::PartialTimeout | Self::Cancelled
        )
    }
}

impl fmt::Display for ConvergencePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::BaselineCaptured => write!(f, "baseline_captured"),
            Self::RestartDispatched => write!(f, "restart_dispatched"),
            Self::Polling => write!(f, "polling"),
            Self::Converged => write!(f, "converged"),
            Self::PartialTimeout => write!(f, "partial_timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An endpoint whose restart command itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartFailure {
    pub endpoint_id: String,
    pub error: String,
}

/// Error type for invalid phase transitions
#[derive(Debug, Clone, thiserror::Error)]
pub enum PhaseTransitionError {
    #[error("Invalid convergence transition from {from} to {to}")]
    InvalidTransition {
        from: ConvergencePhase,
        to: ConvergencePhase,
    },

    #[error("Endpoint {0} is not pending")]
    NotPending(String),
}

/// Mutable state of one restart-and-wait run. Owned by the polling loop.
#[derive(Debug)]
pub struct ConvergenceState {
    phase: ConvergencePhase,
    targets: Vec<String>,
    baselines: HashMap<String, EndpointHealthSnapshot>,
    pending: Vec<String>,
    reregistered: Vec<String>,
    restart_failed: Vec<RestartFailure>,
    restarted_count: usize,
    deadline: Option<Instant>,
}

impl ConvergenceState {
    /// Duplicate targets collapse to their first occurrence.
    pub fn new(targets: &[String]) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();

        Self {
            phase: ConvergencePhase::Init,
            targets,
            baselines: HashMap::new(),
            pending: Vec::new(),
            reregistered: Vec::new(),
            restart_failed: Vec::new(),
            restarted_count: 0,
            deadline: None,
        }
    }

    pub fn phase(&self) -> ConvergencePhase {
        self.phase
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn reregistered(&self) -> &[String] {
        &self.reregistered
    }

    pub fn restart_failed(&self) -> &[RestartFailure] {
        &self.restart_failed
    }

    /// Endpoints whose restart command succeeded.
    pub fn restarted_count(&self) -> usize {
        self.restarted_count
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn baseline(&self, endpoint_id: &str) -> Option<&EndpointHealthSnapshot> {
        self.baselines.get(endpoint_id)
    }

    /// Store baselines. Targets without one get a never-observed (heartbeat 0) baseline.
    pub fn record_baselines(
        &mut self,
        mut baselines: HashMap<String, EndpointHealthSnapshot>,
    ) -> Result<(), PhaseTransitionError> {
        self.expect(ConvergencePhase::Init, ConvergencePhase::BaselineCaptured)?;

        for target in &self.targets {
            baselines
                .entry(target.clone())
                .or_insert_with(|| EndpointHealthSnapshot::never_observed(target.clone()));
        }
        self.baselines = baselines;
        self.transition_to(ConvergencePhase::BaselineCaptured);
        Ok(())
    }

    /// Split restart results into pending (succeeded) and restart_failed.
    /// Only the first result per endpoint counts.
    pub fn record_restart(&mut self, results: &[CommandResult]) -> Result<(), PhaseTransitionError> {
        self.expect(
            ConvergencePhase::BaselineCaptured,
            ConvergencePhase::RestartDispatched,
        )?;

        let mut seen = HashSet::new();
        for result in results {
            if !seen.insert(result.endpoint_id.as_str()) {
                tracing::debug!(
                    "[convergence] ignoring repeated restart result for {}",
                    result.endpoint_id
                );
                continue;
            }
            if result.success {
                self.pending.push(result.endpoint_id.clone());
            } else {
                self.restart_failed.push(RestartFailure {
                    endpoint_id: result.endpoint_id.clone(),
                    error: result
                        .error
                        .clone()
                        .unwrap_or_else(|| "restart command failed".to_string()),
                });
            }
        }
        self.restarted_count = self.pending.len();
        self.transition_to(ConvergencePhase::RestartDispatched);
        Ok(())
    }

    pub fn start_polling(&mut self, deadline: Instant) -> Result<(), PhaseTransitionError> {
        self.expect(ConvergencePhase::RestartDispatched, ConvergencePhase::Polling)?;
        self.deadline = Some(deadline);
        self.transition_to(ConvergencePhase::Polling);
        Ok(())
    }

    /// Whether `observed` proves `endpoint_id` came back after the restart.
    pub fn converges(&self, endpoint_id: &str, observed: &EndpointHealthSnapshot) -> bool {
        let baseline_heartbeat = self
            .baselines
            .get(endpoint_id)
            .map(|b| b.heartbeat_timestamp)
            .unwrap_or(0);
        observed.heartbeat_timestamp > baseline_heartbeat && observed.is_healthy()
    }

    /// Move a pending endpoint to `reregistered`.
    pub fn mark_converged(&mut self, endpoint_id: &str) -> Result<(), PhaseTransitionError> {
        if self.phase != ConvergencePhase::Polling {
            return Err(PhaseTransitionError::InvalidTransition {
                from: self.phase,
                to: ConvergencePhase::Polling,
            });
        }
        let position = self
            .pending
            .iter()
            .position(|p| p == endpoint_id)
            .ok_or_else(|| PhaseTransitionError::NotPending(endpoint_id.to_string()))?;

        let id = self.pending.remove(position);
        self.reregistered.push(id);
        Ok(())
    }

    /// Enter a terminal phase.
    pub fn finish(&mut self, outcome: ConvergencePhase) -> Result<(), PhaseTransitionError> {
        let valid = match outcome {
            ConvergencePhase::Converged => self.pending.is_empty(),
            ConvergencePhase::PartialTimeout => !self.pending.is_empty(),
            ConvergencePhase::Cancelled => true,
            _ => false,
        };
        if self.phase != ConvergencePhase::Polling || !valid {
            return Err(PhaseTransitionError::InvalidTransition {
                from: self.phase,
                to: outcome,
            });
        }
        self.transition_to(outcome);
        Ok(())
    }

    fn expect(
        &self,
        from: ConvergencePhase,
        to: ConvergencePhase,
    ) -> Result<(), PhaseTransitionError> {
        if self.phase == from {
            Ok(())
        } else {
            Err(PhaseTransitionError::InvalidTransition {
                from: self.phase,
                to,
            })
        }
    }

    fn transition_to(&mut self, next: ConvergencePhase) {
        tracing::debug!("[convergence] phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<String>, Vec<RestartFailure>, usize) {
        (
            self.reregistered,
            self.pending,
            self.restart_failed,
            self.restarted_count,
        )
    }
}
