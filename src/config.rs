// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the realtime service.
//!
//! Every section deserializes with defaults, so a partial file or an empty
//! environment still yields a working configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the realtime service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Admission control configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Notification hub configuration
    #[serde(default)]
    pub hub: HubConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Token bucket configuration shared by every subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity in tokens (default: 5)
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per whole elapsed second (default: 3)
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u32,

    /// Key prefix for bucket records in the store
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Idle lifetime of a bucket record in seconds (default: 3600)
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: u64,

    /// What the admission layer does when the store fails
    #[serde(default)]
    pub failure_mode: FailureMode,
}

/// Admission policy applied when the limiter backend errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through without rate-limit headers.
    #[default]
    Open,
    /// Reject the request with 503.
    Closed,
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown failure mode: {other}")),
        }
    }
}

/// Notification hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Deadline for a single wire write in milliseconds (default: 10000)
    #[serde(default = "default_write_wait_ms")]
    pub write_wait_ms: u64,

    /// Keepalive ping period in milliseconds (default: 50000)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Pending messages a client mailbox holds before producers wait (default: 1)
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Upper bound on a single mailbox enqueue; unset means wait indefinitely
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,

    /// Origins allowed to open a websocket; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_capacity() -> u32 {
    5
}

fn default_refill_rate() -> u32 {
    3
}

fn default_bucket_prefix() -> String {
    "bucket:user:".to_string()
}

fn default_bucket_ttl_secs() -> u64 {
    3600
}

fn default_write_wait_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    50_000
}

fn default_mailbox_capacity() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rate_limit: RateLimitConfig::default(),
            hub: HubConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            bucket_prefix: default_bucket_prefix(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_wait_ms: default_write_wait_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            send_timeout_ms: None,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl RateLimitConfig {
    /// Get the idle lifetime of a bucket
    pub fn bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_ttl_secs)
    }
}

impl HubConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            rate_limit: RateLimitConfig {
                capacity: parse_var(&lookup, "RATE_LIMIT_CAPACITY").unwrap_or(defaults.rate_limit.capacity),
                refill_rate: parse_var(&lookup, "RATE_LIMIT_REFILL_RATE")
                    .unwrap_or(defaults.rate_limit.refill_rate),
                bucket_ttl_secs: parse_var(&lookup, "BUCKET_TTL_SECS")
                    .unwrap_or(defaults.rate_limit.bucket_ttl_secs),
                failure_mode: parse_var(&lookup, "RATE_LIMIT_FAILURE_MODE")
                    .unwrap_or(defaults.rate_limit.failure_mode),
                ..defaults.rate_limit
            },
            hub: HubConfig {
                write_wait_ms: parse_var(&lookup, "WS_WRITE_WAIT_MS").unwrap_or(defaults.hub.write_wait_ms),
                ping_interval_ms: parse_var(&lookup, "WS_PING_INTERVAL_MS")
                    .unwrap_or(defaults.hub.ping_interval_ms),
                mailbox_capacity: parse_var(&lookup, "WS_MAILBOX_CAPACITY")
                    .unwrap_or(defaults.hub.mailbox_capacity),
                send_timeout_ms: parse_var(&lookup, "NOTIFY_SEND_TIMEOUT_MS"),
                allowed_origins: lookup("WS_ALLOWED_ORIGINS")
                    .map(|v| {
                        v.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            metrics: MetricsConfig {
                enabled: parse_var(&lookup, "METRICS_ENABLED").unwrap_or(defaults.metrics.enabled),
                ..defaults.metrics
            },
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
