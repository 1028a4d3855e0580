//! `CacheStore` adapters: SQLite (the default), sled and an in-memory moka
//! cache.

mod moka_cache;
mod sled_store;
mod sqlite_store;

pub use moka_cache::MokaCache;
pub use sled_store::SledStore;
pub use sqlite_store::{IN_MEMORY, SqliteStore};

use shared::Result;
use shared::config::StoreBackend;
use std::sync::Arc;
use tracing::info;
use youthumb::CacheStore;

/// Opens the configured backend at `path`.
///
/// `:memory:` gives SQLite a private in-memory database and sled a temporary
/// directory. The memory backend ignores `path`.
pub fn open_store(backend: StoreBackend, path: &str) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(path)?),
        StoreBackend::Sled if path == IN_MEMORY => Arc::new(SledStore::temporary()?),
        StoreBackend::Sled => Arc::new(SledStore::open(path)?),
        StoreBackend::Memory => Arc::new(MokaCache::default()),
    };
    info!(backend = backend.as_str(), path, "cache store ready");
    Ok(store)
}
