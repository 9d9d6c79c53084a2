// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! ptracker Realtime
//!
//! Real-time delivery and admission control for the ptracker API:
//!
//! - Per-user notification hub fanning out to every live websocket
//! - Single coordinator task owning the client registry
//! - One delivery pump per connection with write deadlines and keepalive
//! - Token bucket rate limiting with atomic refill-and-consume in the store
//! - Admission middleware with `X-Ratelimit-*` headers

pub mod admission;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod limiter;
pub mod message;
pub mod metrics;
pub mod store;

pub use config::Config;
pub use hub::{BatchReport, Hub};
pub use limiter::{Decision, RateLimiter};
pub use message::Message;
pub use store::{KvStore, MemoryStore};
