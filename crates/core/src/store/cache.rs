//! Named caches and their entries.
//!
//! A cache is a named map from normalized request key to response snapshot.
//! Caches are created on first open or first write and enumerated in
//! creation order.

use super::connection::CacheStorage;
use super::snapshot::{ResponseKind, ResponseSnapshot};
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Handle to one named cache.
#[derive(Clone, Debug)]
pub struct Cache {
    storage: CacheStorage,
    name: String,
}

/// Listing row for a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub status: u16,
    pub body_sha256: String,
    pub stored_at: String,
}

impl CacheStorage {
    /// Open a cache, creating it if absent. Idempotent.
    pub async fn open_cache(&self, name: &str) -> Result<Cache, Error> {
        let cache = self.cache(name);
        cache.ensure_exists().await?;
        Ok(cache)
    }

    /// Handle to a cache without touching the database.
    ///
    /// Lookups against a cache that does not exist yet report a miss; the
    /// first write creates it.
    pub fn cache(&self, name: &str) -> Cache {
        Cache { storage: self.clone(), name: name.to_string() }
    }

    /// Whether a cache with this name exists.
    pub async fn has_cache(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM caches WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a cache and all its entries.
    ///
    /// Returns whether a cache was removed; deleting a missing cache is a no-op.
    pub async fn delete_cache(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Every cache name in the storage, oldest first.
    ///
    /// Includes caches owned by other workers sharing the database.
    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY seq ASC")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }
}

impl Cache {
    async fn ensure_exists(&self) -> Result<(), Error> {
        let name = self.name.clone();
        let now = chrono::Utc::now().to_rfc3339();
        self.storage
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Store a response under `key`, replacing any previous entry.
    ///
    /// Only ok or opaque responses are written. Returns whether the response
    /// was stored.
    pub async fn put(&self, key: &str, response: &ResponseSnapshot) -> Result<bool, Error> {
        if !response.is_cacheable() {
            tracing::debug!(cache = %self.name, key, status = response.status, "refusing to cache error response");
            return Ok(false);
        }

        let headers_json =
            serde_json::to_string(&response.headers).map_err(|e| Error::CorruptEntry(e.to_string()))?;
        let name = self.name.clone();
        let key = key.to_string();
        let status = response.status;
        let kind = response.kind.as_str();
        let body = response.body.clone();
        let digest = response.body_digest();
        let now = chrono::Utc::now().to_rfc3339();

        self.storage
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
                    params![&name, &now],
                )?;
                conn.execute(
                    "INSERT INTO entries (
                    cache_name, key, status, kind, headers_json, body, body_sha256, stored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(cache_name, key) DO UPDATE SET
                    status = excluded.status,
                    kind = excluded.kind,
                    headers_json = excluded.headers_json,
                    body = excluded.body,
                    body_sha256 = excluded.body_sha256,
                    stored_at = excluded.stored_at",
                    params![&name, &key, status, kind, &headers_json, &body, &digest, &now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(true)
    }

    /// Look up the snapshot stored under `key`.
    ///
    /// Returns None if the key or the cache itself doesn't exist.
    pub async fn match_key(&self, key: &str) -> Result<Option<ResponseSnapshot>, Error> {
        let name = self.name.clone();
        let key = key.to_string();
        self.storage
            .conn
            .call(move |conn| -> Result<Option<ResponseSnapshot>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT status, kind, headers_json, body
                FROM entries WHERE cache_name = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![name, key], |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                });

                let (status, kind, headers_json, body) = match result {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let kind = ResponseKind::parse(&kind)
                    .ok_or_else(|| Error::CorruptEntry(format!("unknown response kind {kind:?} for {key}")))?;
                let headers: Vec<(String, String)> =
                    serde_json::from_str(&headers_json).map_err(|e| Error::CorruptEntry(format!("{key}: {e}")))?;

                Ok(Some(ResponseSnapshot { status, headers, body, kind }))
            })
            .await
            .map_err(Error::from)
    }

    /// Entries in this cache, ordered by key.
    pub async fn entries(&self) -> Result<Vec<EntryInfo>, Error> {
        let name = self.name.clone();
        self.storage
            .conn
            .call(move |conn| -> Result<Vec<EntryInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key, status, body_sha256, stored_at
                FROM entries WHERE cache_name = ?1 ORDER BY key ASC",
                )?;
                let rows = stmt
                    .query_map(params![name], |row| {
                        Ok(EntryInfo {
                            key: row.get(0)?,
                            status: row.get(1)?,
                            body_sha256: row.get(2)?,
                            stored_at: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }

    /// Stored keys, ordered.
    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries().await?.into_iter().map(|e| e.key).collect())
    }
}
