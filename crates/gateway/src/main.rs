//! Gateway service entry point.
//!
//! Wires the upstream feed session, the broadcast engine, the write-through
//! sinks, and the WebSocket server together, then serves until a shutdown
//! signal arrives.

use anyhow::{Context, Result};
use common::{ControlCommand, FeedManager, FeedManagerConfig};
use feed::{spawn_sink_worker, CacheSink, DurableSink, PolygonConfig, PolygonHandler, SinkHandle};
use gateway::{
    create_router, spawn_broadcast_worker, spawn_heartbeat_logger, spawn_stale_sweeper, AppState,
    Config, SessionRegistry, SymbolRefs,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use normalizer::Event;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting market-data gateway");
    let config = Config::from_env();
    info!("  PORT: {}", config.port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  FEED_URL: {}", config.feed_url);
    info!("  CACHE: {}", config.cache_url.as_deref().unwrap_or("disabled"));
    info!("  DURABLE: {}", config.durable_url.as_deref().unwrap_or("disabled"));

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("failed to start Prometheus exporter")?;
    info!("Prometheus metrics on port {}", config.metrics_port);

    let registry = Arc::new(SessionRegistry::new());
    let symbols = Arc::new(SymbolRefs::new());
    let upstream_ready = Arc::new(AtomicBool::new(false));
    let started_at = Instant::now();

    // Write-through sinks, each draining its own bounded queue
    let mut sinks: Vec<SinkHandle> = Vec::new();
    let mut sink_workers = Vec::new();
    if let Some(url) = &config.cache_url {
        match CacheSink::connect(url).await {
            Ok(sink) => {
                let (handle, rx) = SinkHandle::new("cache", config.sink_queue_capacity);
                sink_workers.push(spawn_sink_worker(Arc::new(sink), rx, Duration::from_secs(2)));
                sinks.push(handle);
                info!("hot cache sink active");
            }
            Err(e) => warn!("cache sink unavailable: {} (continuing without it)", e),
        }
    }
    if let Some(url) = &config.durable_url {
        match DurableSink::new(url) {
            Ok(sink) => {
                let (handle, rx) = SinkHandle::new("durable", config.sink_queue_capacity);
                sink_workers.push(spawn_sink_worker(Arc::new(sink), rx, Duration::from_secs(2)));
                sinks.push(handle);
                info!("durable sink active");
            }
            Err(e) => warn!("durable sink unavailable: {} (continuing without it)", e),
        }
    }

    // Broadcast engine: bounded ingress fed by the upstream parser
    let (ingress_tx, ingress_rx) = mpsc::channel::<Arc<Event>>(config.ingress_capacity);
    let broadcast_handle = spawn_broadcast_worker(registry.clone(), ingress_rx, sinks);

    // Upstream feed session (optional: no credential means downstream-only)
    let (feed_tx, feed_handle) = if config.api_key.is_empty() {
        warn!("POLYGON_API_KEY not set, running without the upstream feed");
        (None, None)
    } else {
        let (tx, rx) = mpsc::channel::<ControlCommand>(32);
        let handler = Arc::new(PolygonHandler::new(
            PolygonConfig::new(&config.feed_url, &config.api_key),
            ingress_tx.clone(),
            upstream_ready.clone(),
        ));
        let manager = FeedManager::new(
            handler,
            FeedManagerConfig {
                read_timeout: config.feed_read_timeout,
                auth_timeout: config.feed_auth_timeout,
                backoff: config.backoff(),
                feed_label: "polygon".to_string(),
                ..Default::default()
            },
            rx,
        );
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("upstream feed terminated: {}", e);
            }
        });
        info!("upstream feed session enabled");
        (Some(tx), Some(handle))
    };
    drop(ingress_tx);

    // Warm-up symbols hold a process-lifetime reference so transient
    // subscribers can never unsubscribe them upstream
    if !config.warmup_symbols.is_empty() {
        let to_subscribe = symbols.acquire(&config.warmup_symbols);
        if let Some(tx) = &feed_tx {
            let _ = tx.send(ControlCommand::Subscribe(to_subscribe)).await;
            info!("pinned {} warm-up symbols", config.warmup_symbols.len());
        }
    }

    let sweeper = spawn_stale_sweeper(registry.clone(), config.cleanup_interval, config.stale_after);
    let heartbeat = spawn_heartbeat_logger(registry.clone(), started_at);

    let state = Arc::new(AppState {
        registry: registry.clone(),
        symbols,
        feed_tx: feed_tx.clone(),
        upstream_ready,
        started_at,
        settings: config.session_settings(),
    });
    let app = create_router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Orderly teardown: upstream first, then every downstream session
    info!("shutting down");
    if let Some(tx) = feed_tx {
        let _ = tx.send(ControlCommand::Shutdown).await;
    }
    registry.close_all();
    if let Some(handle) = feed_handle {
        let _ = handle.await;
    }
    sweeper.abort();
    heartbeat.abort();
    broadcast_handle.abort();
    for worker in sink_workers {
        worker.abort();
    }

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
