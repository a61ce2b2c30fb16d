//! SQLite-backed record store.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use profile_mirror_core::persistence::PersistenceStore;

use crate::error::{Result, StorageError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profile_records (
    scope TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (scope, key)
);
"#;

/// Records kept in one table, partitioned by scope (usually the app id).
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    scope: String,
}

impl SqliteRecordStore {
    /// Open or create the database at `path`, creating parent directories if needed.
    pub fn open(path: &Path, scope: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        debug!("[ProfileStore] Opened record database {}", path.display());
        Self::with_connection(conn, scope)
    }

    pub fn open_in_memory(scope: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, scope)
    }

    fn with_connection(conn: Connection, scope: impl Into<String>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            scope: scope.into(),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM profile_records WHERE scope = ?1 AND key = ?2",
                params![self.scope, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO profile_records (scope, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (scope, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![self.scope, key, value, now],
        )?;
        Ok(())
    }

    /// When the record was last written.
    pub fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT updated_at FROM profile_records WHERE scope = ?1 AND key = ?2",
                params![self.scope, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(raw
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|value| value.with_timezone(&Utc)))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM profile_records WHERE scope = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![self.scope], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Removes every record of this scope.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM profile_records WHERE scope = ?1",
            params![self.scope],
        )?;
        Ok(removed)
    }
}

impl PersistenceStore for SqliteRecordStore {
    fn load(&self, key: &str) -> profile_mirror_core::Result<Option<Vec<u8>>> {
        Ok(self.get(key)?)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> profile_mirror_core::Result<()> {
        Ok(self.put(key, bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_mirror_core::commit_log::CommitLog;
    use profile_mirror_core::persistence::{load_records, save_record, RecordKey};

    #[test]
    fn put_overwrites_and_scopes_isolate() {
        let store = SqliteRecordStore::open_in_memory("app.one").unwrap();
        assert_eq!(store.get("cache").unwrap(), None);

        store.put("cache", b"v1").unwrap();
        store.put("cache", b"v2").unwrap();
        assert_eq!(store.get("cache").unwrap(), Some(b"v2".to_vec()));
        assert!(store.updated_at("cache").unwrap().is_some());
        assert_eq!(store.keys().unwrap(), vec!["cache".to_string()]);

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profile.db");

        {
            let store = SqliteRecordStore::open(&path, "app").unwrap();
            let mut log = CommitLog::new();
            log.set_property("hobby", &["tennis"]);
            save_record(&store, RecordKey::CommitLog, &log).unwrap();
            store.save("id", b"P1").unwrap();
        }

        let reopened = SqliteRecordStore::open(&path, "app").unwrap();
        let records = load_records(&reopened);
        assert_eq!(records.profile_id, "P1");
        assert_eq!(records.live_log.len(), 1);

        let other_scope = SqliteRecordStore::open(&path, "other").unwrap();
        assert!(load_records(&other_scope).profile_id.is_empty());
    }
}
