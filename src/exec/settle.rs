//! Settle guard for a single remote call.
//!
//! The worker future and the timeout / cancellation timer race to settle one
//! slot. The first writer flips `settled` and sends through the one-shot
//! channel; every later attempt is a no-op. When the timer wins, the worker
//! task is aborted, which drops the SSH session or kills the child process
//! it owns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CommandResult, ExecError};

struct SettleSlot {
    settled: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<CommandResult>>>,
}

impl SettleSlot {
    fn new(tx: oneshot::Sender<CommandResult>) -> Self {
        Self {
            settled: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Returns `false` if another writer already settled the slot.
    fn settle(&self, result: CommandResult) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(result);
        }
        true
    }
}

/// Run `work` under a `timeout_ms` bound and the caller's cancellation token.
///
/// Exactly one of {worker result, timeout, cancellation} becomes the returned
/// value.
pub async fn settle_within<F>(
    endpoint: &str,
    timeout_ms: u64,
    cancel: &CancellationToken,
    work: F,
) -> CommandResult
where
    F: Future<Output = CommandResult> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(SettleSlot::new(tx));

    let worker_slot = slot.clone();
    let mut worker = tokio::spawn(async move {
        let result = work.await;
        worker_slot.settle(result);
    });

    tokio::select! {
        joined = &mut worker => {
            if let Err(e) = joined {
                slot.settle(CommandResult::failed(endpoint, &ExecError::Internal(e.to_string())));
            }
        }
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            if slot.settle(CommandResult::failed(endpoint, &ExecError::Timeout(timeout_ms))) {
                debug!("[exec] {} timed out after {}ms, aborting", endpoint, timeout_ms);
                worker.abort();
            }
        }
        _ = cancel.cancelled() => {
            if slot.settle(CommandResult::failed(endpoint, &ExecError::Cancelled)) {
                debug!("[exec] {} cancelled, aborting", endpoint);
                worker.abort();
            }
        }
    }

    match rx.await {
        Ok(result) => result,
        Err(_) => CommandResult::failed(
            endpoint,
            &ExecError::Internal("settle channel closed".to_string()),
        ),
    }
}
