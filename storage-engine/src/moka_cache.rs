use async_trait::async_trait;
use chrono::Utc;
use moka::Expiry;
use moka::future::Cache;
use shared::Result;
use std::time::{Duration, Instant};
use tracing::{Span, debug, info_span};
use youthumb::{CacheEntry, CacheStore, ResourceKey};

/// Expires each thumbnail at its own `expires_at`.
struct ThumbnailExpiry;

impl ThumbnailExpiry {
    fn remaining(entry: &CacheEntry) -> Duration {
        (entry.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl Expiry<ResourceKey, CacheEntry> for ThumbnailExpiry {
    fn expire_after_create(
        &self,
        _key: &ResourceKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Self::remaining(value))
    }

    fn expire_after_update(
        &self,
        _key: &ResourceKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::remaining(value))
    }
}

/// Moka-based in-memory thumbnail cache
///
/// Nothing survives a restart. Moka drops expired entries on its own, so the
/// sweeper is only needed to force pending maintenance.
#[derive(Clone)]
pub struct MokaCache {
    cache: Cache<ResourceKey, CacheEntry>,
    span: Span,
}

impl MokaCache {
    pub fn new(name: &str) -> Self {
        let cache = Cache::builder()
            .name(name)
            .expire_after(ThumbnailExpiry)
            .build();

        Self {
            cache,
            span: info_span!("cache_store", backend = "memory", name),
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new("thumbnails")
    }
}

#[async_trait]
impl CacheStore for MokaCache {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>> {
        // Moka's clock is coarser than ours; keep the strict deadline check.
        Ok(self.cache.get(key).await.filter(CacheEntry::is_live))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let key = entry.key.clone();
        let bytes = entry.data.len();
        self.cache.insert(key.clone(), entry).await;
        self.span.in_scope(|| debug!(%key, bytes, "stored thumbnail"));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let before = self.cache.entry_count();
        self.cache.run_pending_tasks().await;
        Ok(before.saturating_sub(self.cache.entry_count()))
    }
}

impl std::fmt::Debug for MokaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCache")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
