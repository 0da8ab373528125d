//! Scripted collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::exec::{settle_within, CommandResult, ExecError, ExecutionOptions, RemoteExecutor};
use crate::health::{
    EndpointDirectory, EndpointHealthSnapshot, HealthSource, HealthStatus, ManagementError,
};

/// Executor that sleeps per endpoint and records concurrency.
pub(crate) struct ScriptedExecutor {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    hangs: HashSet<String>,
    failures: HashMap<String, ExecError>,
    failing_calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    commands: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            delays: HashMap::new(),
            hangs: HashSet::new(),
            failures: HashMap::new(),
            failing_calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, endpoint: &str, delay: Duration) -> Self {
        self.delays.insert(endpoint.to_string(), delay);
        self
    }

    /// The command on `endpoint` never returns.
    pub fn with_hang(mut self, endpoint: &str) -> Self {
        self.hangs.insert(endpoint.to_string());
        self
    }

    pub fn with_failure(mut self, endpoint: &str, error: ExecError) -> Self {
        self.failures.insert(endpoint.to_string(), error);
        self
    }

    /// The first `count` calls on `endpoint` fail with a connection error.
    pub fn with_failing_calls(self, endpoint: &str, count: usize) -> Self {
        self.failing_calls.lock().insert(endpoint.to_string(), count);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn preflight(&self, _options: &ExecutionOptions) -> Result<(), ExecError> {
        Ok(())
    }

    async fn execute(
        &self,
        endpoint: &str,
        command: &str,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands
            .lock()
            .push((endpoint.to_string(), command.to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self
            .delays
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_delay);
        let hang = self.hangs.contains(endpoint);
        let failure = self.failures.get(endpoint).cloned().or_else(|| {
            let mut failing = self.failing_calls.lock();
            match failing.get_mut(endpoint) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Some(ExecError::Connection("connection reset by peer".into()))
                }
                _ => None,
            }
        });
        let endpoint_id = endpoint.to_string();
        let output = format!("{}: {}", endpoint, command);

        settle_within(endpoint, options.timeout_ms, cancel, async move {
            tokio::time::sleep(delay).await;
            if hang {
                std::future::pending::<()>().await;
            }
            match failure {
                Some(e) => CommandResult::failed(&endpoint_id, &e),
                None => CommandResult::completed(&endpoint_id, 0, output, ""),
            }
        })
        .await
    }
}

type HealthStep = Result<(i64, HealthStatus), String>;

/// Health source replaying a per-endpoint script; the last step repeats.
/// Endpoints without a script answer with an error.
pub(crate) struct ScriptedHealth {
    scripts: Mutex<HashMap<String, (Vec<HealthStep>, usize)>>,
    fleet: Option<Vec<String>>,
}

impl ScriptedHealth {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fleet: None,
        }
    }

    pub fn script(self, endpoint: &str, steps: Vec<HealthStep>) -> Self {
        self.scripts
            .lock()
            .insert(endpoint.to_string(), (steps, 0));
        self
    }

    /// Endpoints returned by discovery for any selector.
    pub fn with_fleet(mut self, endpoints: &[&str]) -> Self {
        self.fleet = Some(endpoints.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.scripts
            .lock()
            .get(endpoint)
            .map(|(_, calls)| *calls)
            .unwrap_or(0)
    }
}

#[async_trait]
impl HealthSource for ScriptedHealth {
    async fn get_health(&self, endpoint_id: &str) -> Result<EndpointHealthSnapshot, ManagementError> {
        let mut scripts = self.scripts.lock();
        let (steps, calls) = scripts
            .get_mut(endpoint_id)
            .ok_or_else(|| ManagementError::Http(format!("no script for {}", endpoint_id)))?;

        let step = steps
            .get(*calls)
            .or_else(|| steps.last())
            .cloned()
            .ok_or_else(|| ManagementError::Http(format!("empty script for {}", endpoint_id)))?;
        *calls += 1;

        step.map(|(heartbeat, status)| EndpointHealthSnapshot::new(endpoint_id, heartbeat, status))
            .map_err(ManagementError::Http)
    }
}

#[async_trait]
impl EndpointDirectory for ScriptedHealth {
    async fn list_endpoints(&self, selector: &str) -> Result<Vec<String>, ManagementError> {
        self.fleet.clone().ok_or_else(|| ManagementError::Status {
            status: 503,
            body: format!("discovery unavailable for {}", selector),
        })
    }
}
