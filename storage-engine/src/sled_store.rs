use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::path::Path;
use tracing::{Span, debug, info_span};
use youthumb::{CacheEntry, CacheStore, ResourceKey};

const THUMBNAILS_TREE: &str = "thumbnails";

/// On-disk record; the key lives in the tree key.
#[derive(Serialize, Deserialize)]
struct StoredThumbnail {
    content_type: String,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    expires_at: i64,
}

impl StoredThumbnail {
    fn into_entry(self, key: ResourceKey) -> Result<CacheEntry> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0).ok_or_else(|| {
            Error::Cache(format!("record for {key} has invalid expires_at {}", self.expires_at))
        })?;
        Ok(CacheEntry::new(key, self.content_type, self.data, expires_at))
    }
}

/// Sled-based thumbnail cache
#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
    span: Span,
}

impl SledStore {
    /// Open (creating if needed) the database directory at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Cache(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Cache(format!("Failed to open Sled database: {}", e)))?;
        Self::from_db(db, info_span!("cache_store", backend = "sled", path = %path.display()))
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Cache(format!("Failed to open Sled database: {}", e)))?;
        Self::from_db(db, info_span!("cache_store", backend = "sled", path = "<temporary>"))
    }

    fn from_db(db: sled::Db, span: Span) -> Result<Self> {
        let tree = db
            .open_tree(THUMBNAILS_TREE)
            .map_err(|e| Error::Cache(format!("Failed to open tree: {}", e)))?;
        Ok(Self { tree, span })
    }

    pub fn row_count(&self) -> u64 {
        self.tree.len() as u64
    }

    fn decode(key: ResourceKey, bytes: &[u8]) -> Result<CacheEntry> {
        let record: StoredThumbnail = serde_json::from_slice(bytes)
            .map_err(|e| Error::Cache(format!("Failed to deserialize thumbnail: {}", e)))?;
        record.into_entry(key)
    }
}

#[async_trait]
impl CacheStore for SledStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>> {
        let value = self
            .tree
            .get(key.as_str().as_bytes())
            .map_err(|e| Error::Cache(format!("Failed to get thumbnail: {}", e)))?;

        match value {
            Some(bytes) => {
                let entry = Self::decode(key.clone(), &bytes)?;
                Ok(entry.is_live().then_some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let record = StoredThumbnail {
            content_type: entry.content_type,
            data: entry.data.to_vec(),
            expires_at: entry.expires_at.timestamp(),
        };
        let value = serde_json::to_vec(&record)
            .map_err(|e| Error::Cache(format!("Failed to serialize thumbnail: {}", e)))?;

        // A single insert replaces the whole record atomically.
        self.tree
            .insert(entry.key.as_str().as_bytes(), value)
            .map_err(|e| Error::Cache(format!("Failed to save thumbnail: {}", e)))?;

        self.span
            .in_scope(|| debug!(key = %entry.key, bytes = record.data.len(), "stored thumbnail"));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let mut removed = 0;

        for item in self.tree.iter() {
            let (key, value) =
                item.map_err(|e| Error::Cache(format!("Failed to iterate database: {}", e)))?;
            let expires_at = serde_json::from_slice::<StoredThumbnail>(&value)
                .map(|record| record.expires_at)
                .map_err(|e| Error::Cache(format!("Failed to deserialize thumbnail: {}", e)))?;
            if expires_at > now {
                continue;
            }

            // Only delete the exact record we saw; a concurrent set wins.
            let swapped = self
                .tree
                .compare_and_swap(&key, Some(&value), None as Option<&[u8]>)
                .map_err(|e| Error::Cache(format!("Failed to delete thumbnail: {}", e)))?;
            if swapped.is_ok() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("rows", &self.tree.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use chrono::Duration as TimeDelta;

    #[tokio::test]
    async fn test_sled_store_conformance() {
        let store = SledStore::temporary().unwrap();
        conformance::run_all(&store).await;
    }

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("thumbnails.sled");

        let entry = conformance::entry("abc", b"persisted", TimeDelta::hours(1));
        {
            let store = SledStore::open(&db_path).unwrap();
            store.set(entry.clone()).await.unwrap();
            store.tree.flush().unwrap();
        }

        let reopened = SledStore::open(&db_path).unwrap();
        let got = reopened.get(&entry.key).await.unwrap().unwrap();
        assert_eq!(got.content_type, entry.content_type);
        assert_eq!(got.data, entry.data);
    }

    #[tokio::test]
    async fn test_sled_store_lazy_expiration_keeps_row() {
        let store = SledStore::temporary().unwrap();
        let expired = conformance::entry("old", b"stale", TimeDelta::seconds(-5));
        store.set(expired.clone()).await.unwrap();

        assert!(store.get(&expired.key).await.unwrap().is_none());
        assert_eq!(store.row_count(), 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_sled_store_rejects_corrupt_record() {
        let store = SledStore::temporary().unwrap();
        store.tree.insert("broken", b"not json".to_vec()).unwrap();

        let key = ResourceKey::new("broken").unwrap();
        assert!(matches!(store.get(&key).await, Err(Error::Cache(_))));
    }
}
