//! Versioned response cache.
//!
//! One global (version, etag, last-modified) triple is advanced once per
//! completed sync cycle. Entries are filled lazily and dropped in bulk by
//! [`CacheCoordinator::bump`], under the same write lock that advances the
//! version, so no reader can see the new version next to old entries.
//!
//! Writers bump before releasing the store connection. A miss computed from
//! the store therefore either finished before the write began or observes
//! the new version afterwards and is recomputed.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::app::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub version: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CacheSnapshot {
    fn at(version: u64, now: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", version, now.timestamp_nanos_opt().unwrap_or(0)));
        let digest = hex::encode(hasher.finalize());
        Self {
            version,
            etag: digest[..16].to_string(),
            last_modified: now,
        }
    }

    /// `ETag` and `Last-Modified` header values.
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            ("ETag", format!("\"{}\"", self.etag)),
            (
                "Last-Modified",
                self.last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            ),
        ]
    }
}

/// A value paired with the cache version it was read under.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub snapshot: CacheSnapshot,
    pub value: T,
}

impl<T> Deref for Cached<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

struct CacheState {
    snapshot: CacheSnapshot,
    entries: HashMap<String, serde_json::Value>,
}

pub struct CacheCoordinator {
    state: RwLock<CacheState>,
}

impl Default for CacheCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                snapshot: CacheSnapshot::at(0, Utc::now()),
                entries: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.read().snapshot.clone()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key` with the version it belongs to,
    /// computing and storing it on a miss.
    ///
    /// A computation that a [`bump`](Self::bump) overtook may have read
    /// state from either side of it, so it is discarded and run again
    /// under the new version.
    pub fn get_or_insert_with<T, F>(&self, key: &str, mut compute: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Result<T>,
    {
        loop {
            let snapshot = {
                let state = self.read();
                if let Some(hit) = state.entries.get(key) {
                    let value = serde_json::from_value(hit.clone()).map_err(|e| {
                        RelayError::Other(format!("Corrupt cache entry {}: {}", key, e))
                    })?;
                    return Ok(Cached {
                        snapshot: state.snapshot.clone(),
                        value,
                    });
                }
                state.snapshot.clone()
            };

            let value = compute()?;
            let json = serde_json::to_value(&value)
                .map_err(|e| RelayError::Other(format!("Uncacheable value for {}: {}", key, e)))?;

            let mut state = self.write();
            if state.snapshot.version == snapshot.version {
                state.entries.insert(key.to_string(), json);
                return Ok(Cached { snapshot, value });
            }
            debug!(key, "cache version moved during computation, recomputing");
        }
    }

    /// Advance the version and clear every entry in one step.
    pub fn bump(&self) -> CacheSnapshot {
        let mut state = self.write();
        let next = CacheSnapshot::at(state.snapshot.version + 1, Utc::now());
        let cleared = state.entries.len();
        state.entries.clear();
        state.snapshot = next.clone();
        debug!(version = next.version, cleared, "cache version bumped");
        next
    }
}
