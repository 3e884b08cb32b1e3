//! TTL-bounded cache of uploaded asset handles.
//!
//! Keyed by [`AssetSpec::fingerprint`], so uploading the same image twice
//! within the TTL (in one workflow or across workflows) costs one platform
//! call. Shared across workflows behind an `Arc`.

use std::time::Duration;

use adflow_types::workflow::{AssetHandle, AssetSpec};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CachedHandle {
    handle: AssetHandle,
    stored_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct AssetCache {
    entries: DashMap<String, CachedHandle>,
    ttl: chrono::Duration,
}

impl AssetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Cached handle for `asset`, if present and younger than the TTL.
    pub fn get(&self, asset: &AssetSpec) -> Option<AssetHandle> {
        self.get_at(asset, Utc::now())
    }

    fn get_at(&self, asset: &AssetSpec, now: DateTime<Utc>) -> Option<AssetHandle> {
        let key = asset.fingerprint();
        let entry = self.entries.get(&key)?;
        if now - entry.stored_at < self.ttl {
            return Some(entry.handle.clone());
        }
        drop(entry);
        self.entries.remove(&key);
        None
    }

    pub fn insert(&self, asset: &AssetSpec, handle: AssetHandle) {
        self.insert_at(asset, handle, Utc::now());
    }

    fn insert_at(&self, asset: &AssetSpec, handle: AssetHandle, now: DateTime<Utc>) {
        self.entries.insert(
            asset.fingerprint(),
            CachedHandle {
                handle,
                stored_at: now,
            },
        );
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.stored_at < self.ttl);
        before - self.entries.len()
    }

    /// Drop every entry, expired or not. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
