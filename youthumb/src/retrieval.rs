use crate::domain::{CacheEntry, ResourceKey};
use crate::flight::SingleFlight;
use crate::ports::{CacheStore, Origin};
use shared::Result;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info_span, warn};

/// Cache-aside retrieval: serve from the store, fall back to the origin on a
/// miss and write the fetched thumbnail back.
///
/// Concurrent misses for one key share a single origin fetch and a single
/// store write.
pub struct Retriever {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    flights: SingleFlight<ResourceKey, Result<CacheEntry>>,
    span: Span,
}

impl Retriever {
    pub fn new(store: Arc<dyn CacheStore>, origin: Arc<dyn Origin>) -> Self {
        Self {
            store,
            origin,
            flights: SingleFlight::new(),
            span: info_span!("retriever"),
        }
    }

    pub async fn retrieve(&self, key: &ResourceKey) -> Result<CacheEntry> {
        async {
            if let Some(entry) = self.lookup(key).await {
                debug!(%key, "cache hit");
                return Ok(entry);
            }
            debug!(%key, "cache miss");
            self.flights.run(key, || self.fill(key)).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Store read that degrades to a miss on failure.
    async fn lookup(&self, key: &ResourceKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "cache read failed, falling back to origin");
                None
            }
        }
    }

    async fn fill(&self, key: &ResourceKey) -> Result<CacheEntry> {
        // A flight that closed just before this one opened may have filled it.
        if let Some(entry) = self.lookup(key).await {
            return Ok(entry);
        }

        let entry = self.origin.fetch(key).await?;

        if let Err(e) = self.store.set(entry.clone()).await {
            warn!(%key, error = %e, "failed to store thumbnail in cache");
        }
        Ok(entry)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("flights", &self.flights)
            .finish()
    }
}
