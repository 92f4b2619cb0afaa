//! `fleetd`: supervisor daemon for a fleet of MCP backends.
//!
//! Usage:
//!
//! ```text
//! fleetd [--config fleet.toml] [--listen 127.0.0.1:8080]
//! ```
//!
//! Servers listed under `[[servers]]` are loaded into the in-memory
//! repository, persisted deployments are reconciled, and the operator HTTP
//! surface is served until SIGINT or SIGTERM. Shutdown terminates pooled
//! stdio processes and health tasks; deployments keep running.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use mcp_fleet::{
    agent_runtime::{
        adapters::{
            DockerComposeBackend, LocalProcessBackend, ProcessPool, TokioCommandRunner,
            memory::InMemoryRuntimeRepository,
        },
        ports::RuntimeRepository,
        services::{AgentRuntime, DeploymentOrchestrator},
    },
    config::FleetConfig,
    http,
};
use mockable::DefaultClock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "fleetd", version, about = "Supervise and proxy a fleet of MCP servers")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "FLEETD_CONFIG")]
    config: Option<Utf8PathBuf>,
    /// Overrides the configured listen address.
    #[arg(long, env = "FLEETD_LISTEN")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            FleetConfig::load(path).with_context(|| format!("loading configuration from {path}"))?
        }
        None => FleetConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let clock = Arc::new(DefaultClock);
    let repository = Arc::new(InMemoryRuntimeRepository::new());
    for server in config.seed_servers(&*clock)? {
        repository
            .save_server(&server)
            .await
            .with_context(|| format!("seeding server {}", server.name()))?;
        info!(
            server_id = %server.id(),
            server_name = %server.name(),
            transport = server.config().transport.kind(),
            "server loaded"
        );
    }

    let orchestrator = DeploymentOrchestrator::new(Arc::clone(&repository), Arc::clone(&clock))
        .with_backend(Arc::new(LocalProcessBackend::new(
            config.local_process_settings(),
        )))
        .with_backend(Arc::new(DockerComposeBackend::new(
            Arc::new(TokioCommandRunner::default()),
            config.docker_settings(),
        )));
    let pool = Arc::new(ProcessPool::new(config.pool_stop_grace()));
    let runtime = Arc::new(AgentRuntime::new(
        orchestrator,
        pool,
        clock,
        config.runtime_settings(),
    ));

    let report = runtime
        .bootstrap()
        .await
        .context("reconciling deployments")?;
    info!(
        checked = report.checked,
        alive = report.alive,
        demoted = report.demoted,
        "deployments reconciled"
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(listen = %config.listen, "fleetd listening");

    axum::serve(listener, http::router(Arc::clone(&runtime)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving operator API")?;

    runtime.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
