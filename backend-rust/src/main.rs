//! main.rs — UWB tracker entry point
//!
//! Runs three concurrent tasks:
//!   1. Ranging server: accepts the tag gateway on TCP and keeps the newest report
//!   2. Position consumer: solves the tag position every `consumer.interval_ms`
//!   3. Telemetry server: renderer-facing HTTP + WebSocket feed (optional)
//!
//! Ctrl-C flips the shared shutdown flag; every task winds down and the process exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use uwb_tracker::{
    telemetry, ConnectionServer, LogSink, PositionConsumer, SceneInfo, SharedRangingState,
    TelemetryHub, TrackerConfig, Trilaterator,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "uwb-tracker", about = "Three-anchor UWB tag tracker")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "tracker.toml")]
    config: PathBuf,
    /// Ranging server bind host (overrides config and UWB_HOST)
    #[arg(long)]
    host: Option<String>,
    /// Ranging server port (overrides config and UWB_PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Disable the renderer telemetry server
    #[arg(long)]
    no_telemetry: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_tracker=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut cfg = TrackerConfig::load(&args.config).context("loading configuration")?;
    if let Some(host) = args.host {
        cfg.server.host = host;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    if args.no_telemetry {
        cfg.telemetry.enabled = false;
    }
    cfg.validate().context("validating configuration")?;

    info!(
        "🛰  UWB tracker starting: anchors A1=({}, {}) A2=({}, {}) A3=({}, {}) cm",
        cfg.anchors.a1[0], cfg.anchors.a1[1],
        cfg.anchors.a2[0], cfg.anchors.a2[1],
        cfg.anchors.a3[0], cfg.anchors.a3[1],
    );

    let state = SharedRangingState::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind failure is the one fatal runtime error
    let server = ConnectionServer::bind(&cfg.server, state.clone())
        .await
        .context("starting ranging server")?;

    let anchors = cfg.anchors.positions();
    let hub = TelemetryHub::new(SceneInfo::new(anchors, &cfg.room), cfg.consumer.path_history);
    let consumer = PositionConsumer::new(
        state.clone(),
        Trilaterator::new(anchors, cfg.solver),
        Duration::from_millis(cfg.consumer.interval_ms),
    )
    .with_sink(Arc::new(LogSink::new(cfg.consumer.log_every)))
    .with_sink(hub.clone());

    let mut tasks = vec![
        tokio::spawn(server.run(shutdown_rx.clone())),
        tokio::spawn(consumer.run(shutdown_rx.clone())),
    ];

    if cfg.telemetry.enabled {
        match tokio::net::TcpListener::bind(&cfg.telemetry.bind).await {
            Ok(listener) => {
                let mut rx = shutdown_rx.clone();
                let stop = async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                };
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = telemetry::serve(listener, hub, stop).await {
                        warn!("Telemetry server failed: {e}");
                    }
                }));
            }
            Err(e) => {
                // Renderers are optional; keep tracking without them
                warn!("Telemetry: could not bind {}: {e}", cfg.telemetry.bind);
            }
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Task did not stop within {}s", SHUTDOWN_GRACE.as_secs());
        }
    }
    info!("Reports accepted this run: {}", state.published());
    Ok(())
}
