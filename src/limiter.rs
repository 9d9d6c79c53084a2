// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Token bucket rate limiter backed by a shared key-value store.
//!
//! Every subject (user id) owns one bucket stored as a hashed record with
//! the fields `tokens`, `last_refill` and `retry_after`. Refill and consume
//! run inside a single [`KvStore::update_hash`] call, so concurrent requests
//! for the same subject are linearized by the store and the bucket can never
//! go negative or above capacity.
//!
//! Refill is coarse: only whole elapsed seconds add tokens, and the refill
//! timestamp moves only when tokens were actually added.

use crate::config::RateLimitConfig;
use crate::error::{LimiterError, StoreError};
use crate::store::{Fields, KvStore};
use std::sync::Arc;
use tracing::{debug, warn};

const FIELD_TOKENS: &str = "tokens";
const FIELD_LAST_REFILL: &str = "last_refill";
const FIELD_RETRY_AFTER: &str = "retry_after";

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// One token was consumed
    Allowed {
        /// Tokens left after this request
        remaining: u32,
    },
    /// The bucket was empty
    Denied {
        /// Suggested wait before retrying, in milliseconds
        retry_after_ms: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Token bucket state as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
struct TokenBucket {
    tokens: u32,
    last_refill: f64,
    retry_after_ms: u64,
}

impl TokenBucket {
    /// Decode a stored bucket. An absent record starts full with its refill
    /// clock at `now`.
    fn load(key: &str, fields: &Fields, capacity: u32, now: f64) -> Result<Self, StoreError> {
        Ok(Self {
            tokens: parse_field(key, FIELD_TOKENS, fields.get(FIELD_TOKENS))?.unwrap_or(capacity),
            last_refill: parse_field(key, FIELD_LAST_REFILL, fields.get(FIELD_LAST_REFILL))?
                .unwrap_or(now),
            retry_after_ms: parse_field(key, FIELD_RETRY_AFTER, fields.get(FIELD_RETRY_AFTER))?
                .unwrap_or(0),
        })
    }

    fn store(&self, fields: &mut Fields) {
        fields.insert(FIELD_TOKENS.to_string(), self.tokens.to_string());
        fields.insert(FIELD_LAST_REFILL.to_string(), self.last_refill.to_string());
        fields.insert(FIELD_RETRY_AFTER.to_string(), self.retry_after_ms.to_string());
    }

    /// Refill for whole elapsed seconds, then try to consume one token.
    fn take(&mut self, now: f64, capacity: u32, rate: u32) -> Decision {
        let elapsed = (now - self.last_refill).max(0.0);
        let to_add = (elapsed.floor() as u64).saturating_mul(u64::from(rate));

        if to_add > 0 {
            let refilled = u64::from(self.tokens)
                .saturating_add(to_add)
                .min(u64::from(capacity));
            self.tokens = refilled as u32;
            self.last_refill = now;
        }

        if self.tokens < 1 {
            let rate = f64::from(rate);
            let mut wait = (((1.0 - elapsed * rate) / rate) * 1000.0).ceil();
            if wait < 1.0 {
                // Past one token's worth but short of a whole second: wait
                // for the next refill boundary
                wait = ((1.0 - elapsed.fract()) * 1000.0).ceil();
            }
            self.retry_after_ms = wait.max(1.0) as u64;
            return Decision::Denied {
                retry_after_ms: self.retry_after_ms,
            };
        }

        self.tokens -= 1;
        Decision::Allowed {
            remaining: self.tokens,
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    key: &str,
    field: &str,
    raw: Option<&String>,
) -> Result<Option<T>, StoreError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            value: raw.clone(),
        }),
    }
}

/// Per-subject admission control.
pub struct RateLimiter<S> {
    store: Arc<S>,
    config: RateLimitConfig,
}

impl<S: KvStore> RateLimiter<S> {
    /// Create a limiter over `store`. Capacity and refill rate are fixed for
    /// the limiter's lifetime and shared by every subject.
    pub fn new(store: Arc<S>, mut config: RateLimitConfig) -> Self {
        if config.refill_rate == 0 {
            warn!("Refill rate of 0 would never refill, using 1 token/s");
            config.refill_rate = 1;
        }
        Self { store, config }
    }

    fn bucket_key(&self, subject: &str) -> String {
        format!("{}{}", self.config.bucket_prefix, subject)
    }

    /// Refill and try to consume one token for `subject` in one atomic step.
    pub async fn check(&self, subject: &str) -> Result<Decision, LimiterError> {
        let key = self.bucket_key(subject);
        let capacity = self.config.capacity;
        let rate = self.config.refill_rate;

        let decision = self
            .store
            .update_hash(&key, Some(self.config.bucket_ttl()), |fields, now| {
                let mut bucket = TokenBucket::load(&key, fields, capacity, now)?;
                let decision = bucket.take(now, capacity, rate);
                bucket.store(fields);
                Ok::<_, StoreError>(decision)
            })
            .await??;

        if let Decision::Denied { retry_after_ms } = decision {
            debug!(subject, retry_after_ms, "Subject rate limit exceeded");
        }
        Ok(decision)
    }

    /// Consume one token if available.
    pub async fn allow(&self, subject: &str) -> Result<bool, LimiterError> {
        Ok(self.check(subject).await?.is_allowed())
    }

    /// Last persisted token count. A subject without a bucket reports full
    /// capacity.
    pub async fn tokens(&self, subject: &str) -> Result<u32, LimiterError> {
        let key = self.bucket_key(subject);
        let raw = self.store.get_field(&key, FIELD_TOKENS).await?;
        Ok(parse_field(&key, FIELD_TOKENS, raw.as_ref())?.unwrap_or(self.config.capacity))
    }

    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    /// Most recent wait hint in milliseconds, `0` if the subject was never
    /// denied.
    pub async fn retry_after(&self, subject: &str) -> Result<u64, LimiterError> {
        let key = self.bucket_key(subject);
        let raw = self.store.get_field(&key, FIELD_RETRY_AFTER).await?;
        Ok(parse_field(&key, FIELD_RETRY_AFTER, raw.as_ref())?.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn limiter(capacity: u32, refill_rate: u32) -> RateLimiter<MemoryStore> {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig {
                capacity,
                refill_rate,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_bucket_refills_whole_seconds_only() {
        let mut bucket = TokenBucket {
            tokens: 0,
            last_refill: 10.0,
            retry_after_ms: 0,
        };

        // 0.9s elapsed adds nothing and leaves the clock alone
        assert!(!bucket.take(10.9, 5, 2).is_allowed());
        assert_eq!(bucket.last_refill, 10.0);

        // 1.4s elapsed adds exactly one second's worth
        assert_eq!(bucket.take(11.4, 5, 2), Decision::Allowed { remaining: 1 });
        assert_eq!(bucket.last_refill, 11.4);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let mut bucket = TokenBucket {
            tokens: 4,
            last_refill: 0.0,
            retry_after_ms: 0,
        };
        assert_eq!(bucket.take(1000.0, 5, 3), Decision::Allowed { remaining: 4 });
    }

    #[test]
    fn test_retry_after_is_positive_milliseconds() {
        let mut bucket = TokenBucket {
            tokens: 0,
            last_refill: 0.0,
            retry_after_ms: 0,
        };
        assert_eq!(
            bucket.take(0.0, 5, 2),
            Decision::Denied { retry_after_ms: 500 }
        );
        assert_eq!(
            bucket.take(0.25, 5, 1),
            Decision::Denied { retry_after_ms: 750 }
        );
    }

    #[test]
    fn test_retry_after_covers_whole_second_refill() {
        let mut bucket = TokenBucket {
            tokens: 0,
            last_refill: 0.0,
            retry_after_ms: 0,
        };
        // One token's worth has elapsed, but nothing refills before 1s
        assert_eq!(
            bucket.take(0.5, 5, 3),
            Decision::Denied { retry_after_ms: 500 }
        );
        assert_eq!(
            bucket.take(0.75, 5, 2),
            Decision::Denied { retry_after_ms: 250 }
        );
        assert_eq!(bucket.last_refill, 0.0);
    }

    #[test]
    fn test_absurd_last_refill_saturates() {
        let mut bucket = TokenBucket {
            tokens: 3,
            last_refill: -1e300,
            retry_after_ms: 0,
        };
        assert_eq!(bucket.take(0.0, 5, 2), Decision::Allowed { remaining: 4 });
        assert_eq!(bucket.last_refill, 0.0);
    }

    #[test]
    fn test_load_rejects_corrupt_fields() {
        let mut fields = Fields::new();
        fields.insert(FIELD_TOKENS.into(), "many".into());
        assert!(matches!(
            TokenBucket::load("bucket:user:x", &fields, 5, 0.0),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_scenario() {
        let limiter = limiter(5, 2);

        for i in 0..5 {
            assert!(
                limiter.allow("alice").await.unwrap(),
                "request {} should be allowed",
                i + 1
            );
        }

        assert!(!limiter.allow("alice").await.unwrap());
        assert_eq!(limiter.retry_after("alice").await.unwrap(), 500);
        assert_eq!(limiter.tokens("alice").await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow("alice").await.unwrap());
        assert_eq!(limiter.tokens("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_subject_reports_capacity() {
        let limiter = limiter(7, 1);
        assert_eq!(limiter.tokens("nobody").await.unwrap(), 7);
        assert_eq!(limiter.retry_after("nobody").await.unwrap(), 0);
        assert_eq!(limiter.capacity(), 7);
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let limiter = limiter(1, 1);
        assert!(limiter.allow("alice").await.unwrap());
        assert!(!limiter.allow("alice").await.unwrap());
        assert!(limiter.allow("bob").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_is_clamped() {
        let limiter = limiter(1, 0);
        assert!(limiter.allow("alice").await.unwrap());
        match limiter.check("alice").await.unwrap() {
            Decision::Denied { retry_after_ms } => assert_eq!(retry_after_ms, 1000),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_bucket_expires() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(
            store.clone(),
            RateLimitConfig {
                capacity: 2,
                refill_rate: 1,
                bucket_ttl_secs: 30,
                ..Default::default()
            },
        );
        limiter.allow("alice").await.unwrap();
        assert_eq!(store.len().await, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(limiter.tokens("alice").await.unwrap(), 2);
    }
}
