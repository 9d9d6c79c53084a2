// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

pub mod stores;

use ptracker_realtime::{
    config::Config,
    handlers::AppState,
    hub::Hub,
    limiter::RateLimiter,
    metrics::Metrics,
    store::{KvStore, MemoryStore},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Application state over an arbitrary store.
pub fn app_state_with<S: KvStore>(store: S, config: Config) -> Arc<AppState<S>> {
    let metrics = Metrics::new().expect("metrics registry");
    Arc::new(AppState {
        limiter: RateLimiter::new(Arc::new(store), config.rate_limit.clone()),
        hub: Hub::spawn(&config.hub, metrics.clone()),
        metrics,
        config,
    })
}

pub fn app_state(config: Config) -> Arc<AppState<MemoryStore>> {
    app_state_with(MemoryStore::new(), config)
}

/// Poll `condition` until it holds, failing the test after `limit`.
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
