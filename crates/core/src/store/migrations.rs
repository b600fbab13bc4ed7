//! Storage schema migrations.
//!
//! Each migration is applied once, inside its own transaction, and recorded
//! in `schema_migrations` together with its name.

use crate::Error;
use tokio_rusqlite::{Connection, params, rusqlite};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "caches", sql: include_str!("../../migrations/001_caches.sql") },
    Migration { version: 2, name: "entries", sql: include_str!("../../migrations/002_entries.sql") },
];

/// Schema version this build expects.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Highest applied migration, 0 for a fresh database.
pub(crate) fn applied_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version)
}

/// Bring the schema up to date and return the resulting version.
///
/// A database written by a newer build is refused rather than downgraded.
pub async fn run(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| -> Result<i64, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;

        let applied = applied_version(conn)?;
        if applied > latest_version() {
            return Err(Error::MigrationFailed(format!(
                "database schema v{applied} is newer than supported v{}",
                latest_version()
            )));
        }

        for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)
                .map_err(|e| Error::MigrationFailed(format!("v{} {}: {e}", migration.version, migration.name)))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version = migration.version, name = migration.name, "applied storage migration");
        }

        applied_version(conn)
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_creates_schema() {
        let conn = Connection::open_in_memory().await.unwrap();
        assert_eq!(run(&conn).await.unwrap(), latest_version());

        let tables: Vec<String> = conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .unwrap();
        assert!(tables.contains(&"caches".to_string()));
        assert!(tables.contains(&"entries".to_string()));
    }

    #[tokio::test]
    async fn test_run_twice_applies_nothing_new() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        assert_eq!(run(&conn).await.unwrap(), 2);

        let names: Vec<String> = conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
                let rows = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["caches", "entries"]);
    }

    #[tokio::test]
    async fn test_run_refuses_newer_schema() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        conn.call(|conn| {
            conn.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (99, 'future', 'now')",
                [],
            )
        })
        .await
        .unwrap();

        let result = run(&conn).await;
        assert!(matches!(result, Err(Error::MigrationFailed(_))));
    }
}
