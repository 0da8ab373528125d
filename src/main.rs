use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetctl_lib::{config, logging, FleetConfig, FleetOps};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Run commands across a fleet and track restarts until it converges", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config_dir>/fleetctl/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print JSON instead of the text report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Target endpoint (repeatable); defaults to the discovered fleet
    #[arg(short = 'e', long = "endpoint")]
    endpoints: Vec<String>,

    /// Fleet selector used for discovery
    #[arg(long)]
    fleet: Option<String>,

    /// Maximum concurrent executions
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-endpoint timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command once on every target endpoint
    Exec {
        #[command(flatten)]
        targets: TargetArgs,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Restart every target and wait for it to re-register healthy
    Restart {
        #[command(flatten)]
        targets: TargetArgs,

        /// How long to wait for re-registration
        #[arg(long)]
        wait_seconds: Option<u64>,

        /// Restart command (overrides restart.command)
        #[arg(long = "restart-command")]
        restart_command: Option<String>,
    },
    /// List endpoints registered in the fleet
    Endpoints {
        #[arg(long)]
        fleet: Option<String>,
    },
    /// Show the health snapshot of one endpoint
    Health { endpoint: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("[cli] interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Exec { targets, command } => {
            apply_target_overrides(&mut config, &targets);
            let ops = FleetOps::from_config(&config)?;
            let command = command.join(" ");
            info!(
                "[cli] exec via {} (concurrency {}, timeout {}ms): {}",
                ops.executor_name(),
                ops.options().concurrency,
                ops.options().timeout_ms,
                command
            );

            let report = ops.run_command(&targets.endpoints, &command, &cancel).await?;
            print_output(cli.json, &report)?;
            Ok(exit_code(report.all_succeeded()))
        }
        Commands::Restart {
            targets,
            wait_seconds,
            restart_command,
        } => {
            apply_target_overrides(&mut config, &targets);
            if let Some(wait) = wait_seconds {
                config.restart.wait_seconds = wait;
            }
            if let Some(command) = restart_command {
                config.restart.command = command;
            }
            let ops = FleetOps::from_config(&config)?;
            let wait = Duration::from_secs(config.restart.wait_seconds);
            info!(
                "[cli] restart via {} (concurrency {}, timeout {}ms), waiting up to {}s",
                ops.executor_name(),
                ops.options().concurrency,
                ops.options().timeout_ms,
                wait.as_secs()
            );

            let summary = ops.restart_and_wait(&targets.endpoints, wait, &cancel).await?;
            print_output(cli.json, &summary)?;
            Ok(exit_code(summary.is_complete()))
        }
        Commands::Endpoints { fleet } => {
            if fleet.is_some() {
                config.fleet.selector = fleet;
            }
            let ops = FleetOps::from_config(&config)?;
            let endpoints = ops.list_endpoints().await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&endpoints)?);
            } else {
                for endpoint in &endpoints {
                    println!("{}", endpoint);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health { endpoint } => {
            let ops = FleetOps::from_config(&config)?;
            let snapshot = ops.endpoint_health(&endpoint).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!(
                    "{} {} heartbeat={}",
                    snapshot.endpoint_id, snapshot.status, snapshot.heartbeat_timestamp
                );
            }
            Ok(exit_code(snapshot.is_healthy()))
        }
    }
}

fn apply_target_overrides(config: &mut FleetConfig, targets: &TargetArgs) {
    if let Some(fleet) = &targets.fleet {
        config.fleet.selector = Some(fleet.clone());
    }
    if let Some(concurrency) = targets.concurrency {
        config.execution.concurrency = concurrency;
    }
    if let Some(timeout_ms) = targets.timeout_ms {
        config.execution.timeout_ms = timeout_ms;
    }
}

fn print_output<T: Serialize + std::fmt::Display>(json: bool, value: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
