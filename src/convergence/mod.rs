//! Convergence Tracking
//!
//! Restart a set of endpoints and wait until each proves it came back:
//! a heartbeat newer than its pre-restart baseline, with a healthy status.
//!
//! See [`state`] for the phase machine and [`ConvergenceTracker`] for the loop.

mod state;
mod tracker;

pub use state::{ConvergencePhase, ConvergenceState, PhaseTransitionError, RestartFailure};
pub use tracker::{ConvergenceTracker, DEFAULT_POLL_INTERVAL};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final aggregate of one restart-and-wait run.
///
/// `reregistered` is in detection order, which depends on poll timing;
/// treat it as unordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcome: ConvergencePhase,
    pub restart_succeeded: usize,
    pub restart_failed: Vec<RestartFailure>,
    pub reregistered: Vec<String>,
    pub reregistered_count: usize,
    pub still_pending: Vec<String>,
    pub waited_seconds: u64,
    pub poll_ticks: u32,
}

impl RestartSummary {
    pub(crate) fn from_state(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: ConvergencePhase,
        state: ConvergenceState,
        waited: Duration,
        poll_ticks: u32,
    ) -> Self {
        let (reregistered, still_pending, restart_failed, restart_succeeded) = state.into_parts();
        Self {
            run_id,
            started_at,
            outcome,
            restart_succeeded,
            restart_failed,
            reregistered_count: reregistered.len(),
            reregistered,
            still_pending,
            waited_seconds: waited.as_secs(),
            poll_ticks,
        }
    }

    /// Every restarted endpoint re-registered and no restart failed.
    pub fn is_complete(&self) -> bool {
        self.restart_failed.is_empty() && self.still_pending.is_empty()
    }
}
