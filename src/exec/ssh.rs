//! SSH Exec Backend
//!
//! One authenticated session per call:
//! 1. Resolve the private key from `credential_ref` (fail fast, no connect, if missing)
//! 2. Connect and authenticate by public key
//! 3. Open a session channel and `exec` the command
//! 4. Drain stdout / stderr until the channel closes, keeping the exit status
//!
//! The whole sequence runs inside [`settle_within`], so a timeout or
//! cancellation aborts it and drops the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    capture_to_string, settle_within, CommandResult, ExecError, ExecutionOptions, RemoteExecutor,
    MAX_CAPTURE_BYTES,
};

/// How the server host key is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Require a matching entry in `~/.ssh/known_hosts`
    #[default]
    KnownHosts,
    /// Accept any host key (ephemeral fleets, lab environments)
    AcceptAny,
}

/// Key-based SSH backend.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    default_user: String,
    host_key_policy: HostKeyPolicy,
    key_passphrase: Option<String>,
}

impl SshExecutor {
    /// `default_user` applies to endpoints given without a `user@` prefix.
    /// Falls back to the local user name.
    pub fn new(default_user: Option<String>, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            default_user: default_user.unwrap_or_else(whoami::username),
            host_key_policy,
            key_passphrase: None,
        }
    }

    pub fn with_key_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.key_passphrase = passphrase;
        self
    }

    fn resolve_key(&self, options: &ExecutionOptions) -> Result<PathBuf, ExecError> {
        let raw = options
            .credential_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ExecError::Configuration("no SSH key material resolved".to_string())
            })?;

        let path = expand_home(raw);
        if !path.is_file() {
            return Err(ExecError::Configuration(format!(
                "SSH key not found at {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn preflight(&self, options: &ExecutionOptions) -> Result<(), ExecError> {
        self.resolve_key(options).map(|_| ())
    }

    async fn execute(
        &self,
        endpoint: &str,
        command: &str,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let key_path = match self.resolve_key(options) {
            Ok(path) => path,
            Err(e) => {
                warn!("[ssh-exec] {}: {}", endpoint, e);
                return CommandResult::failed(endpoint, &e);
            }
        };

        let (user, host) = split_endpoint(endpoint, &self.default_user);
        let target = SshTarget {
            endpoint: endpoint.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            port: options.port,
            key_path,
            key_passphrase: self.key_passphrase.clone(),
            host_key_policy: self.host_key_policy,
            command: command.to_string(),
            timeout_ms: options.timeout_ms,
        };

        debug!("[ssh-exec] {}@{}:{} <- {}", target.user, target.host, target.port, command);
        settle_within(endpoint, options.timeout_ms, cancel, async move {
            match exec_over_session(&target).await {
                Ok(result) => result,
                Err(e) => CommandResult::failed(&target.endpoint, &e),
            }
        })
        .await
    }
}

/// Everything one call needs, owned so the work future is `'static`.
struct SshTarget {
    endpoint: String,
    user: String,
    host: String,
    port: u16,
    key_path: PathBuf,
    key_passphrase: Option<String>,
    host_key_policy: HostKeyPolicy,
    command: String,
    timeout_ms: u64,
}

struct FleetHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for FleetHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts => {
                match keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!("[ssh-exec] {}:{} not in known_hosts", self.host, self.port);
                        Ok(false)
                    }
                    Err(e) => {
                        warn!("[ssh-exec] host key check failed for {}: {}", self.host, e);
                        Ok(false)
                    }
                }
            }
        }
    }
}

async fn exec_over_session(target: &SshTarget) -> Result<CommandResult, ExecError> {
    let key = keys::load_secret_key(&target.key_path, target.key_passphrase.as_deref())
        .map_err(|e| {
            ExecError::Configuration(format!(
                "failed to load SSH key {}: {}",
                target.key_path.display(),
                e
            ))
        })?;

    let config = Arc::new(client::Config {
        inactivity_timeout: Some(Duration::from_millis(target.timeout_ms)),
        ..Default::default()
    });
    let handler = FleetHandler {
        host: target.host.clone(),
        port: target.port,
        policy: target.host_key_policy,
    };

    let connection_err =
        |e: russh::Error| ExecError::Connection(format!("{}:{}: {}", target.host, target.port, e));

    let mut session = client::connect(config, (target.host.as_str(), target.port), handler)
        .await
        .map_err(connection_err)?;

    let hash_alg = session
        .best_supported_rsa_hash()
        .await
        .map_err(connection_err)?
        .flatten();
    let auth = session
        .authenticate_publickey(
            target.user.as_str(),
            PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
        )
        .await
        .map_err(connection_err)?;
    if !auth.success() {
        return Err(ExecError::Connection(format!(
            "public key authentication rejected for {}@{}",
            target.user, target.host
        )));
    }

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(connection_err)?;
    channel
        .exec(true, target.command.as_str())
        .await
        .map_err(connection_err)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => append_capped(&mut stdout, &data),
            ChannelMsg::ExtendedData { data, ext: 1 } => append_capped(&mut stderr, &data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("[ssh-exec] disconnect from {} failed: {}", target.host, e);
    }

    let stdout = capture_to_string(stdout);
    let stderr = capture_to_string(stderr);

    Ok(match exit_status {
        Some(code) => CommandResult::completed(&target.endpoint, code as i32, stdout, stderr),
        // Channel closed without ExitStatus: the command's fate is unknown
        None => CommandResult::failed_with_output(
            &target.endpoint,
            &ExecError::Connection("channel closed before exit status".to_string()),
            stdout,
            stderr,
        ),
    })
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8]) {
    let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
    buf.extend_from_slice(&data[..data.len().min(room)]);
}

/// Split `user@host`; endpoints without a user get `default_user`.
fn split_endpoint<'a>(endpoint: &'a str, default_user: &'a str) -> (&'a str, &'a str) {
    match endpoint.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => (user, host),
        _ => (default_user, endpoint),
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
