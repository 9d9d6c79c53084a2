// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Key-value store adapter used by the rate limiter.
//!
//! The limiter needs exactly one non-trivial primitive from its backend:
//! [`KvStore::update_hash`], which applies a closure to the fields of a
//! hashed record as a single indivisible step and hands the closure the
//! store's own clock. A remote backend maps this onto a server-side script
//! or a compare-and-swap loop; [`MemoryStore`] runs it under one lock.

use crate::error::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Fields of a hashed record.
pub type Fields = HashMap<String, String>;

/// Minimal shared store interface.
pub trait KvStore: Send + Sync + 'static {
    /// Read a plain value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Write a plain value, replacing whatever the key held.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Read one field of a hashed record.
    fn get_field(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Atomically read-modify-write a hashed record.
    ///
    /// `apply` receives the current fields (empty for a new record) and the
    /// store clock in fractional seconds. No other operation on `key` can
    /// observe an intermediate state. `ttl`, when given, is refreshed.
    fn update_hash<F, R>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: F,
    ) -> impl Future<Output = Result<R, StoreError>> + Send
    where
        F: FnOnce(&mut Fields, f64) -> R + Send,
        R: Send;
}

#[derive(Debug)]
enum Value {
    Plain(String),
    Hash(Fields),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process store.
///
/// Timestamps handed to [`KvStore::update_hash`] are seconds since the store
/// was created; they are only ever compared with each other.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    epoch: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Purged expired store entries");
        }
        removed
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Look up a live entry, evicting it first if it has expired.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            None => Ok(None),
            Some(Entry {
                value: Value::Plain(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Plain(value),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn update_hash<F, R>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Fields, f64) -> R + Send,
        R: Send,
    {
        let now = Instant::now();
        let clock = now.duration_since(self.epoch).as_secs_f64();
        let mut entries = self.entries.lock().await;

        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(Fields::new()),
            expires_at: None,
        });

        let Value::Hash(fields) = &mut entry.value else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };

        let result = apply(fields, clock);
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_plain_values() {
        let store = MemoryStore::new();
        assert_eq!(store.get("session:1").await.unwrap(), None);

        store.set("session:1", "abc".into(), None).await.unwrap();
        assert_eq!(store.get("session:1").await.unwrap().as_deref(), Some("abc"));

        assert!(store.delete("session:1").await.unwrap());
        assert!(!store.delete("session:1").await.unwrap());
        assert_eq!(store.get("session:1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("token", "t".into(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("token").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("token").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store
            .update_hash("bucket:a", Some(Duration::from_secs(1)), |f, _| {
                f.insert("tokens".into(), "1".into());
            })
            .await
            .unwrap();
        store.set("keep", "v".into(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("plain", "v".into(), None).await.unwrap();
        assert!(matches!(
            store.get_field("plain", "tokens").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.update_hash("plain", None, |_, _| ()).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_hash_clock_advances() {
        let store = MemoryStore::new();
        let first = store.update_hash("k", None, |_, now| now).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        let second = store.update_hash("k", None, |_, now| now).await.unwrap();
        assert!((second - first - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_hash_is_atomic() {
        let store = Arc::new(MemoryStore::new());
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update_hash("counter", None, |fields, _| {
                        let n: u64 = fields
                            .get("n")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        fields.insert("n".into(), (n + 1).to_string());
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(
            store.get_field("counter", "n").await.unwrap().as_deref(),
            Some("50")
        );
    }
}
