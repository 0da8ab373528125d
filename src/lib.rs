//! fleetctl: run commands across a fleet of endpoints and track restarts
//! until every endpoint has re-registered healthy.
//!
//! - [`exec`]: remote executors (SSH, orchestrator exec) and the batch runner
//! - [`health`]: management-plane health reads and endpoint discovery
//! - [`convergence`]: restart-and-wait tracking
//! - [`report`]: structured and text reports
//! - [`fleet`]: the operations the CLI drives

pub mod config;
pub mod convergence;
pub mod error;
pub mod exec;
pub mod fleet;
pub mod health;
pub mod logging;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use config::FleetConfig;
pub use convergence::{ConvergencePhase, RestartSummary};
pub use error::FleetError;
pub use exec::{CommandResult, ExecError, ExecutionOptions, RemoteExecutor};
pub use fleet::FleetOps;
pub use health::{EndpointDirectory, EndpointHealthSnapshot, HealthSource, HealthStatus};
pub use report::BatchReport;
