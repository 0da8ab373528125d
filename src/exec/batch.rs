//! Batch Runner
//!
//! Fans one command out to N endpoints in consecutive fixed windows of
//! `options.concurrency`. Window k+1 is never dispatched before every call in
//! window k has resolved, which bounds concurrent connections. Results come
//! back aligned 1:1 with the input order.

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{CommandResult, ExecError, ExecutionOptions, RemoteExecutor};

/// Window size used when the caller has no preference.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Run `command` on every endpoint, at most `options.concurrency` at a time.
///
/// Always returns exactly `endpoints.len()` results in input order. Once
/// `cancel` fires, endpoints in windows that have not started are reported
/// as cancelled without being contacted.
pub async fn run_batch(
    executor: &dyn RemoteExecutor,
    endpoints: &[String],
    command: &str,
    options: &ExecutionOptions,
    cancel: &CancellationToken,
) -> Vec<CommandResult> {
    let window_size = options.concurrency.max(1);
    let window_count = endpoints.len().div_ceil(window_size);
    let mut results = Vec::with_capacity(endpoints.len());

    for (index, window) in endpoints.chunks(window_size).enumerate() {
        if cancel.is_cancelled() {
            debug!(
                "[batch] cancelled before window {}/{}, skipping {} endpoint(s)",
                index + 1,
                window_count,
                window.len()
            );
            results.extend(
                window
                    .iter()
                    .map(|endpoint| CommandResult::failed(endpoint, &ExecError::Cancelled)),
            );
            continue;
        }

        debug!(
            "[batch] window {}/{} via {}: {:?}",
            index + 1,
            window_count,
            executor.name(),
            window
        );

        // join_all yields outputs in the order the futures were given
        let outcomes = join_all(
            window
                .iter()
                .map(|endpoint| executor.execute(endpoint, command, options, cancel)),
        )
        .await;
        results.extend(outcomes);
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    info!(
        "[batch] {} endpoint(s): {} succeeded, {} failed",
        results.len(),
        succeeded,
        results.len() - succeeded
    );

    results
}
