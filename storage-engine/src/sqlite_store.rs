use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use shared::{Error, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Span, debug, info_span};
use youthumb::{CacheEntry, CacheStore, ResourceKey};

pub const IN_MEMORY: &str = ":memory:";

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS cache (
        video_id TEXT PRIMARY KEY,
        content_type TEXT NOT NULL,
        data BLOB NOT NULL,
        expires_at INTEGER NOT NULL
    )";

/// SQLite-backed thumbnail cache using the `cache` table.
///
/// Every statement runs on tokio's blocking pool. Once a statement has been
/// handed over it runs to completion even if the caller is dropped, so an
/// upsert is never left half done by a cancelled request.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    span: Span,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`; `:memory:` gives a
    /// private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == IN_MEMORY {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Cache(format!("Failed to create directory: {}", e)))?;
            }
            Connection::open(path)
        }
        .map_err(|e| Error::Cache(format!("Failed to open SQLite database: {}", e)))?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::Cache(format!("Failed to set busy timeout: {}", e)))?;
        conn.execute(CREATE_TABLE, [])
            .map_err(|e| Error::Cache(format!("Failed to create cache table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            span: info_span!("cache_store", backend = "sqlite", path = %path.display()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(IN_MEMORY)
    }

    /// Rows physically present, expired ones included.
    pub async fn row_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get::<_, i64>(0))
        })
        .await
        .map(|n| n as u64)
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let span = self.span.clone();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let conn = conn
                .lock()
                .map_err(|e| Error::Cache(format!("SQLite connection poisoned: {}", e)))?;
            op(&conn).map_err(|e| Error::Cache(format!("SQLite: {}", e)))
        })
        .await
        .map_err(|e| Error::Cache(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>> {
        let video_id = key.as_str().to_owned();
        let now = Utc::now().timestamp();

        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT content_type, data, expires_at FROM cache \
                     WHERE video_id = ?1 AND expires_at > ?2",
                    params![video_id, now],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        row.map(|(content_type, data, expires_at)| -> Result<CacheEntry> {
            let expires_at = DateTime::from_timestamp(expires_at, 0).ok_or_else(|| {
                Error::Cache(format!("row for {key} has invalid expires_at {expires_at}"))
            })?;
            Ok(CacheEntry::new(key.clone(), content_type, data, expires_at))
        })
        .transpose()
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let CacheEntry {
            key,
            content_type,
            data,
            expires_at,
        } = entry;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache (video_id, content_type, data, expires_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.as_str(), content_type, &data[..], expires_at.timestamp()],
            )?;
            debug!(%key, bytes = data.len(), "stored thumbnail");
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        self.with_conn(move |conn| conn.execute("DELETE FROM cache WHERE expires_at <= ?1", [now]))
            .await
            .map(|n| n as u64)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("conn", &"<rusqlite::Connection>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use chrono::Duration as TimeDelta;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_sqlite_store_conformance() {
        let store = SqliteStore::open_in_memory().unwrap();
        conformance::run_all(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.db");

        let entry = conformance::entry("abc", b"persisted", TimeDelta::hours(1));
        {
            let store = SqliteStore::open(&db_path).unwrap();
            store.set(entry.clone()).await.unwrap();
        }

        let reopened = SqliteStore::open(&db_path).unwrap();
        let got = reopened.get(&entry.key).await.unwrap().unwrap();
        assert_eq!(got.content_type, entry.content_type);
        assert_eq!(got.data, entry.data);
        assert_eq!(got.expires_at.timestamp(), entry.expires_at.timestamp());
    }

    #[tokio::test]
    async fn test_sqlite_store_lazy_expiration_keeps_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let expired = conformance::entry("old", b"stale", TimeDelta::seconds(-5));
        store.set(expired.clone()).await.unwrap();

        assert!(store.get(&expired.key).await.unwrap().is_none());
        assert_eq!(store.row_count().await.unwrap(), 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.row_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_store_set_completes_after_caller_dropped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entry = conformance::entry("dropped", &[0xab; 4096], TimeDelta::hours(1));

        {
            // Hold the connection so the write cannot finish before the caller is gone.
            let _conn = store.conn.lock().unwrap();
            let pending = store.set(entry.clone()).now_or_never();
            assert!(pending.is_none());
        }

        let stored = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(found) = store.get(&entry.key).await.unwrap() {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(stored.content_type, entry.content_type);
        assert_eq!(stored.data, entry.data);
        assert_eq!(store.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        let columns = store
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_info('cache')",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .unwrap();

        assert_eq!(
            columns,
            vec![
                ("video_id".to_string(), "TEXT".to_string(), 0, 1),
                ("content_type".to_string(), "TEXT".to_string(), 1, 0),
                ("data".to_string(), "BLOB".to_string(), 1, 0),
                ("expires_at".to_string(), "INTEGER".to_string(), 1, 0),
            ]
        );
    }
}
