//! Orchestrator Exec Backend
//!
//! Shells out to an orchestrator CLI once per call:
//!
//! ```text
//! <program> [base_args..] [--kubeconfig <credential_ref>] exec -n <namespace>
//!     [-c <container_ref>] <endpoint> -- sh -c <command>
//! ```
//!
//! The child is spawned with `kill_on_drop`, so aborting the call on timeout
//! or cancellation kills it.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    capture_to_string, settle_within, CommandResult, ExecError, ExecutionOptions, RemoteExecutor,
};

/// Default orchestrator CLI.
pub const DEFAULT_PROGRAM: &str = "kubectl";

/// Orchestrator-exec backend (`kubectl exec` and compatible CLIs).
#[derive(Debug, Clone)]
pub struct OrchestratorExecutor {
    program: String,
    base_args: Vec<String>,
    namespace: String,
}

impl OrchestratorExecutor {
    pub fn new(program: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            namespace: namespace.into(),
        }
    }

    /// Arguments placed before everything else (wrapper scripts, global flags).
    pub fn with_base_args(mut self, base_args: Vec<String>) -> Self {
        self.base_args = base_args;
        self
    }

    fn build_args(&self, endpoint: &str, command: &str, options: &ExecutionOptions) -> Vec<String> {
        let mut args = self.base_args.clone();

        if let Some(kubeconfig) = non_empty(options.credential_ref.as_deref()) {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.to_string());
        }

        args.push("exec".to_string());
        args.push("-n".to_string());
        args.push(self.namespace.clone());

        if let Some(container) = non_empty(options.container_ref.as_deref()) {
            args.push("-c".to_string());
            args.push(container.to_string());
        }

        args.push(endpoint.to_string());
        args.push("--".to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for OrchestratorExecutor {
    fn name(&self) -> &'static str {
        "orchestrator"
    }

    fn preflight(&self, options: &ExecutionOptions) -> Result<(), ExecError> {
        if self.program.trim().is_empty() {
            return Err(ExecError::Configuration(
                "no orchestrator CLI configured".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(ExecError::Configuration(
                "no orchestrator namespace configured".to_string(),
            ));
        }
        if let Some(kubeconfig) = non_empty(options.credential_ref.as_deref()) {
            if !Path::new(kubeconfig).is_file() {
                return Err(ExecError::Configuration(format!(
                    "kubeconfig not found at {}",
                    kubeconfig
                )));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        endpoint: &str,
        command: &str,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> CommandResult {
        if let Err(e) = self.preflight(options) {
            warn!("[orchestrator-exec] {}: {}", endpoint, e);
            return CommandResult::failed(endpoint, &e);
        }

        let args = self.build_args(endpoint, command, options);
        debug!("[orchestrator-exec] {} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = self.program.clone();
        let endpoint_id = endpoint.to_string();

        settle_within(endpoint, options.timeout_ms, cancel, async move {
            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    return CommandResult::failed(
                        &endpoint_id,
                        &ExecError::Connection(format!("failed to spawn {}: {}", program, e)),
                    );
                }
            };

            match child.wait_with_output().await {
                Ok(output) => {
                    let stdout = capture_to_string(output.stdout);
                    let stderr = capture_to_string(output.stderr);
                    match output.status.code() {
                        Some(code) => CommandResult::completed(&endpoint_id, code, stdout, stderr),
                        None => CommandResult::failed_with_output(
                            &endpoint_id,
                            &ExecError::Connection(format!("{} terminated by signal", program)),
                            stdout,
                            stderr,
                        ),
                    }
                }
                Err(e) => CommandResult::failed(
                    &endpoint_id,
                    &ExecError::Connection(format!("waiting on {} failed: {}", program, e)),
                ),
            }
        })
        .await
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
