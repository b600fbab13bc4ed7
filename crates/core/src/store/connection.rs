//! Opening the cache storage database.

use std::path::Path;

use super::migrations;
use crate::Error;
use tokio_rusqlite::Connection;

/// Connection settings applied before migrations. `foreign_keys` makes
/// deleting a cache remove its entries.
const PRAGMAS: &[(&str, &str)] = &[
    ("journal_mode", "WAL"),
    ("synchronous", "NORMAL"),
    ("foreign_keys", "ON"),
    ("busy_timeout", "5000"),
];

/// Handle to the persistent cache area.
///
/// Database work runs on the tokio-rusqlite background thread. Clones share
/// one connection, so every clone sees the same caches.
#[derive(Clone, Debug)]
pub struct CacheStorage {
    pub(crate) conn: Connection,
}

impl CacheStorage {
    /// Open (or create) the storage file at `path`, creating missing parent
    /// directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::InvalidInput(format!("cannot create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        let storage = Self::configure(conn).await?;
        tracing::info!(path = %path.display(), "cache storage opened");
        Ok(storage)
    }

    /// Storage that lives only as long as the handle. Used by tests.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::configure(conn).await
    }

    /// Current schema version.
    pub async fn schema_version(&self) -> Result<i64, Error> {
        self.conn
            .call(|conn| migrations::applied_version(conn))
            .await
            .map_err(Error::from)
    }

    async fn configure(conn: Connection) -> Result<Self, Error> {
        let batch: String = PRAGMAS
            .iter()
            .map(|(name, value)| format!("PRAGMA {name}={value};"))
            .collect();
        conn.call(move |conn| conn.execute_batch(&batch))
            .await
            .map_err(Error::Database)?;

        let version = migrations::run(&conn).await?;
        tracing::debug!(schema_version = version, "cache storage ready");

        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_is_migrated() {
        let storage = CacheStorage::open_in_memory().await.unwrap();
        assert_eq!(storage.schema_version().await.unwrap(), migrations::latest_version());

        let foreign_keys: i64 = storage
            .conn
            .call(|conn| conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_caches_in_order() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("shellcache-test-{}-{nanos}", std::process::id()));
        let path = dir.join("nested").join("storage.sqlite");

        {
            let storage = CacheStorage::open(&path).await.unwrap();
            storage.open_cache("app-shell-v2").await.unwrap();
            storage.open_cache("app-shell-v1").await.unwrap();
        }

        let storage = CacheStorage::open(&path).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["app-shell-v2", "app-shell-v1"]);
        assert_eq!(storage.schema_version().await.unwrap(), 2);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
