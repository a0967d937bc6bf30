//! SQLite-backed wallet store.
//!
//! A single `storage` table of JSON values keyed by name, cached in memory.
//! Non-forced writes stay in the cache until the next flush.

use crate::wallet::{
    labels_from_value, labels_to_value, LabelWallet, LABELS_KEY, MASTER_PUBLIC_KEYS_KEY,
};
use crate::StorageError;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Wallet persisted in a SQLite file
pub struct SqliteWallet {
    conn: Connection,
    basename: String,
    cache: HashMap<String, serde_json::Value>,
    dirty: BTreeSet<String>,
    labels: BTreeMap<String, String>,
}

impl SqliteWallet {
    /// Open (or create) a wallet store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let basename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wallet".to_string());
        Self::from_connection(conn, basename)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, "memory".to_string())
    }

    fn from_connection(conn: Connection, basename: String) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        let mut cache = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT key, value FROM storage")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, raw) = row?;
                match serde_json::from_str(&raw) {
                    Ok(value) => {
                        cache.insert(key, value);
                    }
                    Err(e) => tracing::warn!("Skipping unreadable storage key {}: {}", key, e),
                }
            }
        }

        let labels = cache
            .get(LABELS_KEY)
            .map(labels_from_value)
            .unwrap_or_default();

        Ok(Self {
            conn,
            basename,
            cache,
            dirty: BTreeSet::new(),
            labels,
        })
    }

    /// Record the wallet's master public keys
    pub fn set_master_public_keys(&mut self, keys: &[String]) -> Result<(), StorageError> {
        let value =
            serde_json::to_value(keys).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.put(MASTER_PUBLIC_KEYS_KEY, value, true)
    }

    /// Set a label locally and persist the label mapping
    pub fn set_label(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.labels.insert(key.to_string(), value.to_string());
        let value = labels_to_value(&self.labels)?;
        self.put(LABELS_KEY, value, true)
    }
}

impl LabelWallet for SqliteWallet {
    fn basename(&self) -> &str {
        &self.basename
    }

    fn master_public_keys(&self) -> Vec<String> {
        match self.cache.get(MASTER_PUBLIC_KEYS_KEY) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            // Keystore-name -> key mapping
            Some(serde_json::Value::Object(map)) => map
                .values()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.labels
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.cache.get(key).cloned()
    }

    fn put(
        &mut self,
        key: &str,
        value: serde_json::Value,
        force_flush: bool,
    ) -> Result<(), StorageError> {
        self.cache.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
        if force_flush {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        for key in &self.dirty {
            let Some(value) = self.cache.get(key) else {
                continue;
            };
            let raw = serde_json::to_string(value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO storage (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )?;
        }
        tx.commit()?;

        tracing::debug!("Flushed {} storage keys for {}", self.dirty.len(), self.basename);
        self.dirty.clear();
        Ok(())
    }
}
