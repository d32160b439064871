use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Mutex;

use crate::error::StorageError;
use crate::logging::{self, obj, v_num, v_str, Domain};

/// Fixed keys for everything the dashboard persists.
pub mod keys {
    pub const PRICE_HISTORY: &str = "history.price";
    pub const POOL_HISTORY: &str = "history.pool";
    pub const SETTINGS: &str = "settings";
    pub const WORKER_URLS: &str = "worker_urls";
}

/// Durable key/value store holding JSON values.
pub struct KvStore {
    conn: Mutex<Connection>,
}

impl KvStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let store = Self { conn: Mutex::new(Connection::open(path)?) };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "BEGIN;
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                COMMIT;",
            )?;
            Ok(())
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&conn)
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?)
        })
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Corrupt { key: key.to_string(), source }),
        }
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(StorageError::Encode)?;
        self.put_raw(key, &raw)?;
        logging::debug(
            Domain::Storage,
            "put",
            obj(&[("key", v_str(key)), ("bytes", v_num(raw.len() as f64))]),
        );
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0))
    }

    /// All entries ordered by key.
    pub fn entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_put_get_roundtrip_and_overwrite() {
        let store = KvStore::open_in_memory().unwrap();
        assert_eq!(store.get_json::<Vec<u32>>("a").unwrap(), None);
        store.put_json("a", &vec![1u32, 2]).unwrap();
        store.put_json("a", &vec![3u32]).unwrap();
        assert_eq!(store.get_json::<Vec<u32>>("a").unwrap(), Some(vec![3]));
    }

    #[test]
    fn test_corrupt_value_reports_key() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_raw(keys::SETTINGS, "{not json").unwrap();
        let err = store.get_json::<BTreeMap<String, bool>>(keys::SETTINGS).unwrap_err();
        match err {
            StorageError::Corrupt { key, .. } => assert_eq!(key, keys::SETTINGS),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_entries_sorted_and_remove() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_raw("b", "2").unwrap();
        store.put_raw("a", "1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    }
}
