//! In-memory wallet used for embedding and tests.

use crate::wallet::LabelWallet;
use crate::StorageError;
use std::collections::{BTreeMap, HashMap};

/// Wallet whose "disk" is a second map, so deferred writes are observable.
#[derive(Debug, Clone, Default)]
pub struct MemoryWallet {
    basename: String,
    master_public_keys: Vec<String>,
    labels: BTreeMap<String, String>,
    staged: HashMap<String, serde_json::Value>,
    persisted: HashMap<String, serde_json::Value>,
    flush_count: usize,
}

impl MemoryWallet {
    pub fn new<I, S>(basename: &str, master_public_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            basename: basename.to_string(),
            master_public_keys: master_public_keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Builder-style helper to seed labels
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Value as it would be found on disk
    pub fn persisted(&self, key: &str) -> Option<&serde_json::Value> {
        self.persisted.get(key)
    }

    /// Number of physical writes performed so far
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }
}

impl LabelWallet for MemoryWallet {
    fn basename(&self) -> &str {
        &self.basename
    }

    fn master_public_keys(&self) -> Vec<String> {
        self.master_public_keys.clone()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.labels
    }

    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.staged
            .get(key)
            .or_else(|| self.persisted.get(key))
            .cloned()
    }

    fn put(
        &mut self,
        key: &str,
        value: serde_json::Value,
        force_flush: bool,
    ) -> Result<(), StorageError> {
        self.staged.insert(key.to_string(), value);
        if force_flush {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.persisted.extend(self.staged.drain());
        self.flush_count += 1;
        Ok(())
    }
}
