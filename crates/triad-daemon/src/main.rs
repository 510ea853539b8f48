//! Entry point for the sync daemon: loads configuration, builds the service
//! context, and drives it until a shutdown signal arrives.

use anyhow::{Context, Result};
use tracing::{error, info};

use triad_core::config::Config;
use triad_core::lockfile::DaemonLockfile;
use triad_resilience::shutdown::ShutdownSignal;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    if config.general.log_format == "json" {
        triad_telemetry::logging::init_logging_json("triad-daemon", &config.general.log_level);
    } else {
        triad_telemetry::logging::init_logging("triad-daemon", &config.general.log_level);
    }

    info!(
        h_api_url = %config.clients.h_api_url,
        sync_interval_ms = config.sync.sync_interval_ms,
        dry_run = config.sync.dry_run,
        "starting triad-daemon"
    );

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        api_port: parse_port(&config.admin.bind_addr),
        host: host_of(&config.admin.bind_addr),
        started_at: chrono::Utc::now().to_rfc3339(),
        project_path: std::env::current_dir().ok().map(|p| p.display().to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(e) = lockfile.acquire_or_fail() {
        anyhow::bail!("cannot start: {e}");
    }

    let ctx = triad_daemon::service::build(config)
        .await
        .context("building service context")?;

    let shutdown = ShutdownSignal::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrl_c_shutdown.trigger();
        }
    });

    let run_result = triad_daemon::service::run(ctx, shutdown).await;
    DaemonLockfile::remove();

    if let Err(e) = &run_result {
        error!(error = %e, "daemon exited with an error");
    }
    run_result
}

fn host_of(bind_addr: &str) -> String {
    bind_addr.rsplit_once(':').map(|(host, _)| host.to_string()).unwrap_or_else(|| bind_addr.to_string())
}

fn parse_port(bind_addr: &str) -> u16 {
    bind_addr.rsplit_once(':').and_then(|(_, port)| port.parse().ok()).unwrap_or(0)
}
