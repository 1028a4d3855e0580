use crate::domain::{CacheEntry, ResourceKey};
use async_trait::async_trait;
use shared::Result;

// Ports are the pluggable extension points for storage and origin adapters

/// Port for the persistent thumbnail cache (SQLite, sled, moka)
///
/// Handles are shared process-wide and used concurrently without any
/// application-level locking, so every adapter must make `set` an atomic
/// whole-row replacement.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the entry for `key` if one exists and has not yet expired.
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>>;

    /// Unconditionally replaces whatever is stored under `entry.key`.
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    /// Physically removes expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Port for the server that owns the original thumbnails
#[async_trait]
pub trait Origin: Send + Sync + 'static {
    async fn fetch(&self, key: &ResourceKey) -> Result<CacheEntry>;
}
