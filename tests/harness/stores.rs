// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Store doubles.

use ptracker_realtime::error::StoreError;
use ptracker_realtime::store::{Fields, KvStore};
use std::time::Duration;

/// A store whose backend is never reachable.
#[derive(Debug, Default)]
pub struct UnreachableStore;

fn unreachable() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

impl KvStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(unreachable())
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(unreachable())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(unreachable())
    }

    async fn get_field(&self, _key: &str, _field: &str) -> Result<Option<String>, StoreError> {
        Err(unreachable())
    }

    async fn update_hash<F, R>(
        &self,
        _key: &str,
        _ttl: Option<Duration>,
        _apply: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Fields, f64) -> R + Send,
        R: Send,
    {
        Err(unreachable())
    }
}
