// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! ptracker Realtime Service
//!
//! Serves the websocket notification feed and admission-checked
//! notification fan-out for the ptracker API.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `RATE_LIMIT_CAPACITY`: Bucket capacity per user (default: 5)
//! - `RATE_LIMIT_REFILL_RATE`: Tokens per elapsed second (default: 3)
//! - `RATE_LIMIT_FAILURE_MODE`: `open` or `closed` (default: open)
//! - `BUCKET_TTL_SECS`: Idle bucket lifetime (default: 3600)
//! - `WS_WRITE_WAIT_MS`: Websocket write deadline (default: 10000)
//! - `WS_PING_INTERVAL_MS`: Keepalive period (default: 50000)
//! - `WS_MAILBOX_CAPACITY`: Pending messages per client (default: 1)
//! - `NOTIFY_SEND_TIMEOUT_MS`: Bound on a mailbox enqueue (default: none)
//! - `WS_ALLOWED_ORIGINS`: Comma-separated origin allowlist (default: any)
//! - `METRICS_ENABLED`: Expose Prometheus metrics (default: true)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ptracker_realtime::{
    config::Config,
    handlers::{router, AppState},
    hub::Hub,
    limiter::RateLimiter,
    metrics::Metrics,
    store::MemoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        capacity = config.rate_limit.capacity,
        refill_rate = config.rate_limit.refill_rate,
        failure_mode = ?config.rate_limit.failure_mode,
        ping_interval_ms = config.hub.ping_interval_ms,
        "Starting ptracker realtime service"
    );

    // Create application state
    let metrics = Metrics::new()?;
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), config.rate_limit.clone());
    let hub = Hub::spawn(&config.hub, metrics.clone());

    let state = Arc::new(AppState {
        limiter,
        hub: hub.clone(),
        metrics,
        config: config.clone(),
    });

    // Spawn cleanup task for idle buckets
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            store.purge_expired().await;
        }
    });

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            hub.shutdown();
        })
        .await?;

    Ok(())
}
