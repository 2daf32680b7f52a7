//! Market Feed Engine Binary
//!
//! Starts the trade ingestion engine, its market-hours scheduler and the
//! health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_API_TOKENS`: Comma-separated upstream tokens, one connection each
//!   (or `FEED_API_TOKEN_1`, `FEED_API_TOKEN_2`, ...)
//! - `FEED_SYMBOLS` or `FEED_SYMBOLS_FILE`: Symbol universe
//!
//! ## Optional
//! - `FEED_WS_URL`: Upstream endpoint (default: wss://ws.finnhub.io)
//! - `FEED_SHARD_CAPACITY`: Symbols per connection (default: 50)
//! - `TRADE_SAVE_INTERVAL_MS`: Per-symbol save spacing (default: 10000)
//! - `TRADE_DB_PATH`: Trade database file (default: trades.db)
//! - `MARKET_TIMEZONE` / `MARKET_OPEN` / `MARKET_CLOSE`: Session hours
//! - `SCHEDULER_ENABLED`: Drive sessions from the calendar (default: true)
//! - `FEED_ENGINE_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_feed_engine::application::ports::{SessionLifecycle, TradeStore};
use market_feed_engine::application::services::{
    ConnectionManager, FeedEngine, HealthMonitor, ManagerConfig, MessageRouter, ScheduleController,
    SubscriptionDriver, TradeCoalescer,
};
use market_feed_engine::infrastructure::feed::WebSocketTransport;
use market_feed_engine::infrastructure::health::{HealthServer, HealthServerState};
use market_feed_engine::infrastructure::persistence::{InMemoryTradeStore, TursoTradeStore};
use market_feed_engine::infrastructure::telemetry;
use market_feed_engine::{EngineConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market feed engine");

    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let tasks = TaskTracker::new();

    let store = open_store(&config.persistence.db_path).await;
    let coalescer = Arc::new(TradeCoalescer::new(
        store,
        config.persistence.save_interval,
    ));
    let router = Arc::new(MessageRouter::new(Arc::clone(&coalescer)));

    let transport = Arc::new(WebSocketTransport::new(
        config.feed.url.clone(),
        config.feed.heartbeat(),
    ));
    let connections = Arc::new(ConnectionManager::new(
        config.credentials.clone(),
        transport,
        router,
        ManagerConfig {
            connect_stagger: config.feed.connect_stagger,
            reconnect: config.reconnect.policy(),
            pacing: config.feed.pacing(),
            event_buffer: config.feed.event_buffer,
        },
    ));
    let driver = SubscriptionDriver::new(
        Arc::clone(&connections),
        config.feed.shard_capacity,
        config.feed.pacing(),
    );
    let engine = Arc::new(FeedEngine::new(
        connections,
        driver,
        coalescer,
        config.symbols.universe(),
        config.feed.settle_delay,
    ));

    let lifecycle: Arc<dyn SessionLifecycle> = Arc::clone(&engine) as Arc<dyn SessionLifecycle>;
    let scheduler = Arc::new(ScheduleController::new(
        config.schedule.calendar(),
        Arc::clone(&lifecycle),
        config.schedule.poll_interval,
        config.schedule.enabled,
    ));
    let monitor = Arc::new(HealthMonitor::new(
        lifecycle,
        Arc::clone(&scheduler),
        config.schedule.health_interval,
    ));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
        Arc::clone(&scheduler),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tasks.spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let scheduler_task = Arc::clone(&scheduler);
    let scheduler_cancel = shutdown_token.clone();
    tasks.spawn(async move {
        scheduler_task.run(scheduler_cancel).await;
    });

    let monitor_cancel = shutdown_token.clone();
    tasks.spawn(async move {
        monitor.run(monitor_cancel).await;
    });
    tasks.close();

    tracing::info!(state = ?scheduler.state(), "Market feed engine ready");

    await_shutdown(shutdown_token).await;

    engine.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    tracing::info!(stats = ?engine.stats(), "Market feed engine stopped");
    Ok(())
}

/// Open the durable trade store, falling back to memory so ingestion and
/// the latest-trade view keep working when the database is unavailable.
async fn open_store(path: &str) -> Arc<dyn TradeStore> {
    match TursoTradeStore::open(path).await {
        Ok(store) => {
            tracing::info!(path, "Trade store opened");
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!(path, error = %e, "Trade store unavailable, trades kept in memory only");
            Arc::new(InMemoryTradeStore::new())
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        credentials = config.credentials.valid_count(),
        shard_capacity = config.feed.shard_capacity,
        save_interval_ms = u64::try_from(config.persistence.save_interval.as_millis()).unwrap_or(u64::MAX),
        scheduler_enabled = config.schedule.enabled,
        timezone = %config.schedule.timezone,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        url = %config.feed.url,
        db_path = %config.persistence.db_path,
        "Endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
