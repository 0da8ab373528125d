//! Remote Execution
//!
//! Runs one command on one endpoint and always yields a [`CommandResult`].
//! Failures (missing key material, connect errors, non-zero exits, timeouts,
//! cancellation) are encoded in the result, never returned as `Err`.
//!
//! Two backends implement [`RemoteExecutor`]:
//! - [`SshExecutor`]: authenticates per call and runs the command on an exec channel
//! - [`OrchestratorExecutor`]: shells out to an orchestrator CLI (`kubectl exec` style)
//!
//! [`run_batch`] fans a command out across many endpoints in fixed windows.

mod batch;
mod orchestrator;
mod settle;
mod ssh;

pub use batch::{run_batch, DEFAULT_CONCURRENCY};
pub use orchestrator::{OrchestratorExecutor, DEFAULT_PROGRAM as DEFAULT_ORCHESTRATOR_PROGRAM};
pub use settle::settle_within;
pub use ssh::{HostKeyPolicy, SshExecutor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Cap on captured stdout / stderr per stream.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Per-call execution settings. Defaults are filled in by the config layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// SSH private key path, or kubeconfig path for the orchestrator backend
    pub credential_ref: Option<String>,
    pub port: u16,
    pub timeout_ms: u64,
    pub concurrency: usize,
    /// Container name inside the target pod (orchestrator backend only)
    pub container_ref: Option<String>,
}

/// Outcome of one command on one endpoint.
///
/// `exit_code == None` means the process never completed (timeout,
/// cancellation, transport failure), as opposed to a non-zero exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub endpoint_id: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// The remote process ran to completion with `exit_code`.
    pub fn completed(
        endpoint_id: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        let error = (exit_code != 0).then(|| ExecError::NonZeroExit(exit_code).to_string());
        Self {
            endpoint_id: endpoint_id.into(),
            success: exit_code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            error,
        }
    }

    /// The process never completed.
    pub fn failed(endpoint_id: impl Into<String>, err: &ExecError) -> Self {
        Self::failed_with_output(endpoint_id, err, String::new(), String::new())
    }

    /// The process never completed, but some output was captured before it stopped.
    pub fn failed_with_output(
        endpoint_id: impl Into<String>,
        err: &ExecError,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
            error: Some(err.to_string()),
        }
    }

    /// True when the process never produced an exit status.
    pub fn is_incomplete(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// Per-endpoint failure classes. Rendered into [`CommandResult::error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command exited with status {0}")]
    NonZeroExit(i32),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("execution task failed: {0}")]
    Internal(String),
}

/// Uniform contract over both transports.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Check transport prerequisites without contacting any endpoint.
    fn preflight(&self, options: &ExecutionOptions) -> Result<(), ExecError>;

    /// Run `command` on `endpoint`. Never fails; see [`CommandResult`].
    async fn execute(
        &self,
        endpoint: &str,
        command: &str,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> CommandResult;
}

/// Lossy UTF-8 decode with a byte cap, used by both backends.
pub(crate) fn capture_to_string(mut bytes: Vec<u8>) -> String {
    if bytes.len() > MAX_CAPTURE_BYTES {
        bytes.truncate(MAX_CAPTURE_BYTES);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
