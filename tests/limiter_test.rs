// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rate limiter behaviour under concurrency and over time.

mod harness;

use harness::stores::UnreachableStore;
use ptracker_realtime::{
    config::RateLimitConfig,
    error::{LimiterError, StoreError},
    limiter::{Decision, RateLimiter},
    store::MemoryStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn limiter(capacity: u32, refill_rate: u32) -> Arc<RateLimiter<MemoryStore>> {
    Arc::new(RateLimiter::new(
        Arc::new(MemoryStore::new()),
        RateLimitConfig {
            capacity,
            refill_rate,
            ..Default::default()
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_exceed_capacity() {
    let capacity = 20;
    let limiter = limiter(capacity, 1);

    let tasks: Vec<_> = (0..capacity * 2)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("alice").await })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if assert_ok!(task.await.unwrap()) {
            admitted += 1;
        }
    }

    assert_eq!(admitted, capacity);
    assert_eq!(limiter.tokens("alice").await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refill_after_whole_second() {
    let limiter = limiter(2, 3);
    assert!(limiter.allow("bob").await.unwrap());
    assert!(limiter.allow("bob").await.unwrap());
    assert!(!limiter.allow("bob").await.unwrap());

    // Refill only counts whole seconds, whatever the rate
    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(!limiter.allow("bob").await.unwrap());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(limiter.allow("bob").await.unwrap());
    // Three tokens were added but capacity caps the bucket at two
    assert_eq!(limiter.tokens("bob").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_consistent_with_rate() {
    for rate in [1u32, 2, 3, 4, 10] {
        let limiter = limiter(1, rate);
        assert!(limiter.allow("carol").await.unwrap());

        match limiter.check("carol").await.unwrap() {
            Decision::Denied { retry_after_ms } => {
                assert!(retry_after_ms > 0);
                assert_eq!(retry_after_ms, u64::from(1000u32.div_ceil(rate)));
                assert_eq!(limiter.retry_after("carol").await.unwrap(), retry_after_ms);
            }
            other => panic!("rate {rate}: expected denial, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_backend_failure_is_surfaced() {
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), RateLimitConfig::default());

    let err = assert_err!(limiter.allow("dave").await);
    assert!(matches!(err, LimiterError::Backend(StoreError::Unavailable(_))));
    assert_err!(limiter.tokens("dave").await);
    assert_err!(limiter.retry_after("dave").await);
    assert_eq!(limiter.capacity(), 5);
}
