//! health-plane - service health control plane
//!
//! Probes registered services, trips circuit breakers, restarts failed
//! services through an external supervisor and escalates when that fails.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./plane_config.toml (or built-in defaults)
//! health-plane
//!
//! # Explicit config, JSON logs
//! health-plane --config /etc/health-plane.toml --log-json
//!
//! # Validate a config file and print the effective configuration
//! health-plane --config plane.toml check-config
//! ```
//!
//! # Environment Variables
//!
//! - `PLANE_CONFIG`: config file path (when `--config` is not given)
//! - `PLANE_*`: per-setting overrides, see `PlaneConfig::with_env_overrides`
//! - `PLANE_CORS_ORIGINS`: comma-separated origins allowed to call the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use health_plane::api::create_app;
use health_plane::{ControlPlane, PlaneConfig};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "health-plane")]
#[command(about = "Service health control plane: probing, circuit breaking, self-healing")]
#[command(version)]
struct CliArgs {
    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Serve the API without periodic probing (probes run only on request)
    #[arg(long)]
    no_probing: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Load and validate the configuration, print it as TOML, and exit
    CheckConfig,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Prober,
    Orchestrator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Prober => write!(f, "Prober"),
            TaskName::Orchestrator => write!(f, "Orchestrator"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    plane: ControlPlane,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, create_app(plane))
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the periodic probe loops; the task owns their lifetime.
fn spawn_prober(task_set: &mut JoinSet<Result<TaskName>>, plane: ControlPlane, cancel_token: CancellationToken) {
    task_set.spawn(async move {
        info!("[Prober] Task starting");
        plane.registry.start_periodic_probing(&cancel_token);
        cancel_token.cancelled().await;
        plane.registry.stop();
        Ok(TaskName::Prober)
    });
}

fn spawn_orchestrator(
    task_set: &mut JoinSet<Result<TaskName>>,
    plane: ControlPlane,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Orchestrator] Task starting");
        plane.orchestrator.clone().run(cancel_token).await;
        Ok(TaskName::Orchestrator)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe cancellation and finish cleanly.
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!("Supervisor: task {} stopped", task_name);
        }
    }

    Ok(())
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PlaneConfig> {
    match path {
        Some(path) => PlaneConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .with_env_overrides()
            .context("Invalid configuration after env overrides"),
        None => PlaneConfig::load().context("Invalid configuration"),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut config = load_config(args.config.as_ref())?;
    if let Some(addr) = args.addr.clone() {
        config.server.addr = addr;
    }

    if let Some(SubCommand::CheckConfig) = args.command {
        config.validate()?;
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        addr = %config.server.addr,
        probe_timeout_ms = config.probe.timeout_ms,
        failure_threshold = config.probe.failure_threshold,
        breaker_cooldown_ms = config.breaker.cooldown_ms,
        services = config.services.len(),
        "health-plane {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let server_addr = config.server.addr.clone();
    let plane = ControlPlane::with_default_transports(config).context("Failed to build HTTP client")?;
    plane
        .register_configured_services()
        .await
        .context("Failed to register configured services")?;

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind {server_addr}"))?;
    info!("API listening on http://{}", server_addr);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, plane.clone(), cancel_token.clone());
    spawn_orchestrator(&mut task_set, plane.clone(), cancel_token.clone());
    if args.no_probing {
        warn!("Periodic probing disabled (--no-probing)");
    } else {
        spawn_prober(&mut task_set, plane.clone(), cancel_token.clone());
    }

    run_supervisor(&mut task_set, cancel_token).await?;
    plane.orchestrator.detach();
    info!("health-plane stopped");
    Ok(())
}
