//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise `-v` count picks the level for this
//! crate. Everything goes to stderr so stdout carries only reports.

use tracing_subscriber::EnvFilter;

/// Filter directive for `-v` count when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("warn,fleetctl={level},fleetctl_lib={level}")
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("[logging] subscriber already installed");
    }
}
