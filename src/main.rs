//! Parking engine - session and slot allocation service for multi-floor car parks
//!
//! Module structure:
//! - `domain/` - Core business types (ParkingSession, Floor, errors)
//! - `io/` - External interfaces (lanes, notifier, recognition, archive, Prometheus)
//! - `services/` - Business logic (ParkingEngine, FloorRegistry, billing)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use parking_engine::infra::{Config, Metrics};
use parking_engine::io::{
    create_notifier, start_lane_listener, HttpRecognizer, LaneHandler, LaneListenerConfig, NotifierConfig,
    SessionArchive,
};
use parking_engine::services::ParkingEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking engine - admits and releases vehicles across parking floors
#[derive(Parser, Debug)]
#[command(name = "parking-engine", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-request visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "parking-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        floors = config.floors().len(),
        total_capacity = config.total_capacity(),
        slot_mode = %config.slot_mode().as_str(),
        max_closed = config.retention().max_closed,
        closed_ttl_secs = config.closed_ttl_secs(),
        notify_enabled = config.notify_enabled(),
        lane_port = config.lane_listener_port(),
        prometheus_port = config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let mut engine = ParkingEngine::from_config(&config, metrics.clone()).context("failed to build parking engine")?;

    // Backend notifications (worker ends when the engine drops its sender)
    if config.notify_enabled() {
        let (sender, worker) =
            create_notifier(NotifierConfig::from_config(&config), metrics.clone(), config.notify_queue_size())
                .context("failed to build notification client")?;
        tokio::spawn(worker.run());
        engine = engine.with_notifier(sender);
    }

    let engine = Arc::new(engine);
    info!(site = %engine.site_id(), "engine_started");

    // Lane TCP listener
    let mut handler = LaneHandler::new(engine.clone(), metrics.clone());
    match HttpRecognizer::from_config(&config) {
        Ok(recognizer) => {
            info!(url = %recognizer.url(), "plate_recognizer_configured");
            handler = handler.with_recognizer(Arc::new(recognizer));
        }
        Err(e) => warn!(error = %e, "plate_recognizer_unavailable"),
    }
    let lane_config = LaneListenerConfig {
        port: config.lane_listener_port(),
        enabled: config.lane_listener_enabled(),
    };
    let handler = Arc::new(handler);
    let lane_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_lane_listener(lane_config, handler, lane_shutdown).await {
            error!(error = %e, "Lane listener error");
        }
    });

    // Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_engine = engine.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                parking_engine::io::prometheus::start_metrics_server(prometheus_port, prom_engine, prom_shutdown)
                    .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary
    let report_engine = engine.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let floors = report_engine.floor_snapshot();
            let occupied = floors.iter().map(|f| u64::from(f.occupied)).sum();
            let capacity = floors.iter().map(|f| u64::from(f.total_capacity)).sum();
            report_engine.metrics().report(report_engine.active_count(), occupied, capacity).log();
        }
    });

    // Closed-session retention, archiving whatever gets evicted. Failed
    // writes stay pending and are retried on the next tick.
    let retention_engine = engine.clone();
    let archive = SessionArchive::new(config.archive_file(), config.site_id());
    let prune_every = Duration::from_secs(config.closed_ttl_secs().clamp(1, 60));
    let mut retention_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        let mut pending = Vec::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    pending.extend(retention_engine.prune_closed(Utc::now()));
                    if !pending.is_empty() {
                        pending = archive.write_sessions(pending);
                        if !pending.is_empty() {
                            warn!(pending = pending.len(), "archive_writes_pending");
                        }
                    }
                }
                _ = retention_shutdown.changed() => {
                    if *retention_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Let listeners observe the signal before the runtime stops
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = engine.statistics();
    info!(
        active_sessions = stats.currently_parked,
        revenue_retained = stats.revenue,
        "parking-engine shutdown complete"
    );
    Ok(())
}
