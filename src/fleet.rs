//! Fleet Operations
//!
//! `FleetOps` ties the executor, the management-plane collaborators and the
//! effective configuration together. It is the surface the CLI drives:
//!
//! ```text
//!   run_command      preflight → resolve targets → batch    → BatchReport
//!   restart_and_wait preflight → resolve targets → tracker  → RestartSummary
//!   list_endpoints / endpoint_health                        → management API
//! ```
//!
//! Configuration problems are raised before any endpoint is contacted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{FleetConfig, TransportConfig, DEFAULT_RESTART_COMMAND};
use crate::convergence::{ConvergenceTracker, RestartSummary, DEFAULT_POLL_INTERVAL};
use crate::error::FleetError;
use crate::exec::{
    run_batch, ExecutionOptions, OrchestratorExecutor, RemoteExecutor, SshExecutor,
};
use crate::health::{EndpointDirectory, EndpointHealthSnapshot, HealthSource, ManagementClient};
use crate::report::BatchReport;

pub struct FleetOps {
    executor: Arc<dyn RemoteExecutor>,
    health: Option<Arc<dyn HealthSource>>,
    directory: Option<Arc<dyn EndpointDirectory>>,
    options: ExecutionOptions,
    selector: Option<String>,
    restart_command: String,
    poll_interval: Duration,
}

impl FleetOps {
    pub fn new(executor: Arc<dyn RemoteExecutor>, options: ExecutionOptions) -> Self {
        Self {
            executor,
            health: None,
            directory: None,
            options,
            selector: None,
            restart_command: DEFAULT_RESTART_COMMAND.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build executor and management client from a loaded configuration.
    pub fn from_config(config: &FleetConfig) -> Result<Self, FleetError> {
        let executor: Arc<dyn RemoteExecutor> = match &config.transport {
            TransportConfig::Ssh {
                user,
                host_key_policy,
                key_passphrase_env,
                ..
            } => {
                let passphrase = key_passphrase_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok());
                Arc::new(
                    SshExecutor::new(user.clone(), *host_key_policy).with_key_passphrase(passphrase),
                )
            }
            TransportConfig::Orchestrator {
                program,
                base_args,
                namespace,
                ..
            } => Arc::new(
                OrchestratorExecutor::new(program.clone(), namespace.clone())
                    .with_base_args(base_args.clone()),
            ),
        };

        let mut ops = Self::new(executor, config.execution_options())
            .with_selector(config.fleet.selector.clone())
            .with_restart_command(config.restart.command.clone())
            .with_poll_interval(Duration::from_secs(config.restart.poll_interval_secs.max(1)));

        if let Some(base_url) = config.management.base_url.as_deref() {
            let client = Arc::new(
                ManagementClient::new(
                    base_url,
                    config.management.token.clone(),
                    Duration::from_secs(config.management.request_timeout_secs.max(1)),
                )
                .map_err(|e| FleetError::configuration(e.to_string()))?,
            );
            ops = ops.with_health(client.clone()).with_directory(client);
        }

        Ok(ops)
    }

    pub fn with_health(mut self, health: Arc<dyn HealthSource>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn EndpointDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_restart_command(mut self, command: impl Into<String>) -> Self {
        self.restart_command = command.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Explicit endpoints if any were given, otherwise the discovered fleet.
    pub async fn resolve_targets(&self, explicit: &[String]) -> Result<Vec<String>, FleetError> {
        let explicit = dedup_preserving_order(explicit);
        if !explicit.is_empty() {
            return Ok(explicit);
        }

        let selector = self.selector.as_deref().ok_or_else(|| {
            FleetError::configuration("no endpoints given and no fleet selector configured")
        })?;
        let directory = self.directory.as_ref().ok_or_else(|| {
            FleetError::configuration("endpoint discovery needs management.base_url")
        })?;

        let discovered = directory
            .list_endpoints(selector)
            .await
            .map_err(|source| FleetError::Discovery {
                selector: selector.to_string(),
                source,
            })?;

        let targets = dedup_preserving_order(&discovered);
        if targets.is_empty() {
            return Err(FleetError::NoTargets(format!(
                "fleet '{}' has no endpoints",
                selector
            )));
        }

        info!("[fleet] discovered {} endpoint(s) in '{}'", targets.len(), selector);
        Ok(targets)
    }

    /// Run `command` once on every target.
    pub async fn run_command(
        &self,
        explicit: &[String],
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, FleetError> {
        if command.trim().is_empty() {
            return Err(FleetError::configuration("command is empty"));
        }
        self.preflight()?;
        let targets = self.resolve_targets(explicit).await?;

        let results = run_batch(
            self.executor.as_ref(),
            &targets,
            command,
            &self.options,
            cancel,
        )
        .await;
        Ok(BatchReport::new(command, results))
    }

    /// Restart every target and wait up to `wait` for each to re-register.
    pub async fn restart_and_wait(
        &self,
        explicit: &[String],
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<RestartSummary, FleetError> {
        if self.restart_command.trim().is_empty() {
            return Err(FleetError::configuration("restart command is empty"));
        }
        let health = self.health.clone().ok_or_else(|| {
            FleetError::configuration("convergence tracking needs management.base_url")
        })?;
        self.preflight()?;
        let targets = self.resolve_targets(explicit).await?;

        let tracker = ConvergenceTracker::new(self.executor.clone(), health)
            .with_poll_interval(self.poll_interval);
        let summary = tracker
            .restart_and_wait(&targets, &self.restart_command, &self.options, wait, cancel)
            .await?;
        Ok(summary)
    }

    /// Endpoints currently registered under the configured selector.
    pub async fn list_endpoints(&self) -> Result<Vec<String>, FleetError> {
        let selector = self
            .selector
            .as_deref()
            .ok_or_else(|| FleetError::configuration("no fleet selector configured"))?;
        let directory = self.directory.as_ref().ok_or_else(|| {
            FleetError::configuration("endpoint discovery needs management.base_url")
        })?;

        directory
            .list_endpoints(selector)
            .await
            .map_err(|source| FleetError::Discovery {
                selector: selector.to_string(),
                source,
            })
    }

    pub async fn endpoint_health(&self, endpoint_id: &str) -> Result<EndpointHealthSnapshot, FleetError> {
        let health = self.health.as_ref().ok_or_else(|| {
            FleetError::configuration("health reads need management.base_url")
        })?;
        Ok(health.get_health(endpoint_id).await?)
    }

    fn preflight(&self) -> Result<(), FleetError> {
        if self.options.timeout_ms == 0 {
            return Err(FleetError::configuration("timeout_ms must be greater than zero"));
        }
        self.executor.preflight(&self.options).map_err(|e| {
            warn!("[fleet] {} preflight failed: {}", self.executor.name(), e);
            FleetError::configuration(e.to_string())
        })
    }
}

fn dedup_preserving_order(endpoints: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    endpoints
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty() && seen.insert(e.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::ConvergencePhase;
    use crate::exec::ExecError;
    use crate::health::HealthStatus;
    use crate::testing::{ScriptedExecutor, ScriptedHealth};

    fn options() -> ExecutionOptions {
        ExecutionOptions {
            credential_ref: None,
            port: 22,
            timeout_ms: 2_000,
            concurrency: 2,
            container_ref: None,
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_explicit_targets_are_deduplicated() {
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options());
        let targets = ops
            .resolve_targets(&strings(&["b", "a", " b ", "", "c", "a"]))
            .await
            .unwrap();
        assert_eq!(targets, strings(&["b", "a", "c"]));
    }

    #[tokio::test]
    async fn test_discovery_used_without_explicit_targets() {
        let directory = Arc::new(ScriptedHealth::new().with_fleet(&["x", "y"]));
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options())
            .with_directory(directory)
            .with_selector(Some("edge".into()));

        assert_eq!(ops.resolve_targets(&[]).await.unwrap(), strings(&["x", "y"]));
    }

    #[tokio::test]
    async fn test_missing_selector_is_configuration_error() {
        let directory = Arc::new(ScriptedHealth::new().with_fleet(&["x"]));
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options())
            .with_directory(directory)
            .with_selector(Some("  ".into()));

        assert!(matches!(
            ops.resolve_targets(&[]).await,
            Err(FleetError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_fleet_is_no_targets() {
        let directory = Arc::new(ScriptedHealth::new().with_fleet(&[]));
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options())
            .with_directory(directory)
            .with_selector(Some("edge".into()));

        assert!(matches!(ops.resolve_targets(&[]).await, Err(FleetError::NoTargets(_))));
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let directory = Arc::new(ScriptedHealth::new());
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options())
            .with_directory(directory)
            .with_selector(Some("edge".into()));

        match ops.resolve_targets(&[]).await {
            Err(FleetError::Discovery { selector, source }) => {
                assert_eq!(selector, "edge");
                assert!(matches!(source, crate::health::ManagementError::Status { status: 503, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_command_reports_every_target() {
        let executor = Arc::new(
            ScriptedExecutor::new(Duration::from_millis(10))
                .with_failure("b", ExecError::Connection("refused".into())),
        );
        let ops = FleetOps::new(executor.clone(), options());
        let cancel = CancellationToken::new();

        let report = ops
            .run_command(&strings(&["a", "b", "c"]), "uptime", &cancel)
            .await
            .unwrap();

        assert_eq!(report.command, "uptime");
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let ids: Vec<_> = report.results.iter().map(|r| r.endpoint_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_command_contacts_nobody() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::ZERO));
        let ops = FleetOps::new(executor.clone(), options());
        let cancel = CancellationToken::new();

        let err = ops.run_command(&strings(&["a"]), "  ", &cancel).await.unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected_before_contact() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::ZERO));
        let health = Arc::new(ScriptedHealth::new());
        let mut zero = options();
        zero.timeout_ms = 0;
        let ops = FleetOps::new(executor.clone(), zero).with_health(health.clone());
        let cancel = CancellationToken::new();

        let err = ops.run_command(&strings(&["a"]), "uptime", &cancel).await.unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
        let err = ops
            .restart_and_wait(&strings(&["a"]), Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
        assert_eq!(executor.calls(), 0);
        assert_eq!(health.calls("a"), 0);
    }

    #[tokio::test]
    async fn test_restart_requires_health_source() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::ZERO));
        let ops = FleetOps::new(executor.clone(), options());
        let cancel = CancellationToken::new();

        let err = ops
            .restart_and_wait(&strings(&["a"]), Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_and_wait_converges() {
        let health = Arc::new(
            ScriptedHealth::new()
                .script("a", vec![Ok((100, HealthStatus::Healthy)), Ok((200, HealthStatus::Healthy))])
                .script("b", vec![Ok((100, HealthStatus::Healthy)), Ok((300, HealthStatus::Healthy))]),
        );
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(10)));
        let ops = FleetOps::new(executor.clone(), options())
            .with_health(health)
            .with_restart_command("systemctl restart agent")
            .with_poll_interval(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let summary = ops
            .restart_and_wait(&strings(&["a", "b"]), Duration::from_secs(30), &cancel)
            .await
            .unwrap();

        assert_eq!(summary.outcome, ConvergencePhase::Converged);
        assert_eq!(summary.reregistered_count, 2);
        assert!(summary.is_complete());
        assert!(executor
            .commands()
            .iter()
            .all(|(_, command)| command == "systemctl restart agent"));
    }

    #[tokio::test]
    async fn test_endpoint_health_passthrough() {
        let health = Arc::new(ScriptedHealth::new().script("a", vec![Ok((42, HealthStatus::Degraded))]));
        let ops = FleetOps::new(Arc::new(ScriptedExecutor::new(Duration::ZERO)), options())
            .with_health(health);

        let snapshot = ops.endpoint_health("a").await.unwrap();
        assert_eq!(snapshot.heartbeat_timestamp, 42);
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert!(matches!(
            ops.endpoint_health("zzz").await,
            Err(FleetError::Management(_))
        ));
    }

    #[test]
    fn test_from_config_without_management() {
        let config = FleetConfig::default();
        let ops = FleetOps::from_config(&config).unwrap();
        assert_eq!(ops.executor_name(), "ssh");
        assert_eq!(ops.options().timeout_ms, 30_000);
        assert!(ops.health.is_none());
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let mut config = FleetConfig::default();
        config.management.base_url = Some("ftp://mgmt".into());
        assert!(matches!(
            FleetOps::from_config(&config),
            Err(FleetError::Configuration(_))
        ));
    }
}
