//! Restart-and-wait tracker
//!
//! 1. Capture a baseline health snapshot for every target
//! 2. Dispatch the restart command through the batch runner
//! 3. Poll health for the pending set every `poll_interval` until it is empty,
//!    the deadline passes, or the caller cancels
//!
//! Health reads inside a tick run concurrently; removals from `pending` are
//! applied afterwards, one by one, by the loop that owns the state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{ConvergencePhase, ConvergenceState, PhaseTransitionError};
use super::RestartSummary;
use crate::exec::{run_batch, ExecutionOptions, RemoteExecutor};
use crate::health::{EndpointHealthSnapshot, HealthSource, ManagementError};

/// Default delay between polling ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on concurrent health reads.
const HEALTH_READ_CONCURRENCY: usize = 16;

/// Drives restart-and-wait runs. Holds no per-run state.
#[derive(Clone)]
pub struct ConvergenceTracker {
    executor: Arc<dyn RemoteExecutor>,
    health: Arc<dyn HealthSource>,
    poll_interval: Duration,
}

impl ConvergenceTracker {
    pub fn new(executor: Arc<dyn RemoteExecutor>, health: Arc<dyn HealthSource>) -> Self {
        Self {
            executor,
            health,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Restart every target and wait up to `wait` for each to re-register.
    ///
    /// Per-endpoint failures end up in the summary; only a broken phase
    /// sequence is an error.
    pub async fn restart_and_wait(
        &self,
        targets: &[String],
        restart_command: &str,
        options: &ExecutionOptions,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<RestartSummary, PhaseTransitionError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut state = ConvergenceState::new(targets);
        let targets = state.targets().to_vec();

        info!(
            "[convergence] run {}: restarting {} endpoint(s), waiting up to {}s",
            run_id,
            targets.len(),
            wait.as_secs()
        );

        let baselines = tokio::select! {
            baselines = self.capture_baselines(&targets) => baselines,
            _ = cancel.cancelled() => HashMap::new(),
        };
        state.record_baselines(baselines)?;

        let results = run_batch(
            self.executor.as_ref(),
            &targets,
            restart_command,
            options,
            cancel,
        )
        .await;
        state.record_restart(&results)?;

        for failure in state.restart_failed() {
            warn!(
                "[convergence] run {}: restart failed on {}: {}",
                run_id, failure.endpoint_id, failure.error
            );
        }

        let loop_start = Instant::now();
        state.start_polling(loop_start + wait)?;

        let mut ticks = 0u32;
        while state.has_pending() && state.deadline().is_some_and(|d| Instant::now() < d) {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
            ticks += 1;

            let pending = state.pending().to_vec();
            let observations = tokio::select! {
                observations = self.read_health(&pending) => observations,
                _ = cancel.cancelled() => break,
            };

            let converged: Vec<String> = pending
                .into_iter()
                .zip(observations)
                .filter_map(|(endpoint_id, observed)| match observed {
                    Ok(snapshot) if state.converges(&endpoint_id, &snapshot) => Some(endpoint_id),
                    Ok(snapshot) => {
                        debug!(
                            "[convergence] tick {}: {} not yet ({} @ {}, baseline {})",
                            ticks,
                            endpoint_id,
                            snapshot.status,
                            snapshot.heartbeat_timestamp,
                            state
                                .baseline(&endpoint_id)
                                .map(|b| b.heartbeat_timestamp)
                                .unwrap_or(0)
                        );
                        None
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(
                            "[convergence] tick {}: {} not registered yet",
                            ticks, endpoint_id
                        );
                        None
                    }
                    Err(e) => {
                        debug!(
                            "[convergence] tick {}: health read for {} failed, still waiting: {}",
                            ticks, endpoint_id, e
                        );
                        None
                    }
                })
                .collect();

            for endpoint_id in converged {
                state.mark_converged(&endpoint_id)?;
                info!("[convergence] run {}: {} re-registered", run_id, endpoint_id);
            }
        }

        let outcome = if cancel.is_cancelled() {
            ConvergencePhase::Cancelled
        } else if state.has_pending() {
            ConvergencePhase::PartialTimeout
        } else {
            ConvergencePhase::Converged
        };
        state.finish(outcome)?;

        let waited = loop_start.elapsed();
        info!(
            "[convergence] run {} {}: {} re-registered, {} pending, {} restart failure(s) after {}s",
            run_id,
            state.phase(),
            state.reregistered().len(),
            state.pending().len(),
            state.restart_failed().len(),
            waited.as_secs()
        );

        Ok(RestartSummary::from_state(
            run_id, started_at, outcome, state, waited, ticks,
        ))
    }

    /// Baseline per target. A failed read becomes a heartbeat-0 baseline.
    async fn capture_baselines(&self, targets: &[String]) -> HashMap<String, EndpointHealthSnapshot> {
        let observations = self.read_health(targets).await;

        targets
            .iter()
            .zip(observations)
            .map(|(endpoint_id, observed)| {
                let baseline = observed.unwrap_or_else(|e| {
                    debug!(
                        "[convergence] no baseline for {} ({}), treating as never observed",
                        endpoint_id, e
                    );
                    EndpointHealthSnapshot::never_observed(endpoint_id.clone())
                });
                (endpoint_id.clone(), baseline)
            })
            .collect()
    }

    /// Concurrent health reads, returned in the order of `endpoints`.
    async fn read_health(
        &self,
        endpoints: &[String],
    ) -> Vec<Result<EndpointHealthSnapshot, ManagementError>> {
        let health = &self.health;
        stream::iter(endpoints)
            .map(move |endpoint_id| health.get_health(endpoint_id))
            .buffered(HEALTH_READ_CONCURRENCY)
            .collect()
            .await
    }
}
