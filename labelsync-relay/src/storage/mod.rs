//! SQLite storage backend for the relay.

pub mod models;

use crate::error::RelayError;
use chrono::Utc;
use models::StoredLabel;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe relay storage.
#[derive(Clone)]
pub struct RelayStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RelayStorage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, anyhow::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, anyhow::Error> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wallets (
                wallet_id TEXT PRIMARY KEY,
                nonce INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS labels (
                wallet_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                encrypted_label TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (wallet_id, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_labels_wallet_nonce
                ON labels(wallet_id, nonce);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RelayError> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Internal(format!("Lock error: {}", e)))
    }

    /// Upsert labels for a wallet and raise the wallet's nonce.
    ///
    /// Labels are stored at the pushed nonce or the wallet's current one,
    /// whichever is higher, so a device with a lagging nonce still lands
    /// where other devices pull from. Nothing is stored if the wallet would
    /// end up with more than `max_labels` labels.
    pub fn store_labels(
        &self,
        wallet_id: &str,
        nonce: u64,
        labels: &[(String, String)],
        max_labels: usize,
    ) -> Result<u64, RelayError> {
        let pushed = to_sql_nonce(nonce)?;
        let now = Utc::now().timestamp();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = wallet_nonce(&tx, wallet_id)?;
        if pushed < current {
            tracing::debug!(
                "{} pushed at stale nonce {}, storing at {}",
                wallet_id,
                pushed,
                current
            );
        }
        let nonce = pushed.max(current);

        {
            let mut upsert = tx.prepare(
                "INSERT INTO labels (wallet_id, external_id, encrypted_label, nonce, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(wallet_id, external_id) DO UPDATE SET
                    encrypted_label = excluded.encrypted_label,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at",
            )?;
            for (external_id, encrypted_label) in labels {
                upsert.execute(params![wallet_id, external_id, encrypted_label, nonce, now])?;
            }
        }

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM labels WHERE wallet_id = ?1",
            [wallet_id],
            |row| row.get(0),
        )?;
        if count as usize > max_labels {
            // Dropping the transaction rolls it back
            return Err(RelayError::LimitExceeded(format!(
                "wallet would hold {} labels, limit is {}",
                count, max_labels
            )));
        }

        tx.execute(
            "INSERT INTO wallets (wallet_id, nonce) VALUES (?1, ?2)
             ON CONFLICT(wallet_id) DO UPDATE SET nonce = MAX(nonce, excluded.nonce)",
            params![wallet_id, nonce],
        )?;
        tx.commit()?;

        Ok(nonce as u64)
    }

    /// Labels pushed at or after `since`, plus the wallet's nonce (0 if unknown)
    pub fn labels_since(
        &self,
        wallet_id: &str,
        since: u64,
    ) -> Result<(Vec<StoredLabel>, u64), RelayError> {
        let since = to_sql_nonce(since)?;
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT external_id, encrypted_label, nonce
             FROM labels
             WHERE wallet_id = ?1 AND nonce >= ?2
             ORDER BY nonce ASC, external_id ASC",
        )?;
        let labels = stmt
            .query_map(params![wallet_id, since], |row| {
                Ok(StoredLabel {
                    external_id: row.get(0)?,
                    encrypted_label: row.get(1)?,
                    nonce: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let nonce = wallet_nonce(&conn, wallet_id)?;
        Ok((labels, nonce as u64))
    }
}

/// Highest nonce stored for a wallet, 0 for unknown wallets
fn wallet_nonce(conn: &Connection, wallet_id: &str) -> Result<i64, RelayError> {
    let nonce = conn
        .query_row(
            "SELECT nonce FROM wallets WHERE wallet_id = ?1",
            [wallet_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(nonce.unwrap_or(0))
}

fn to_sql_nonce(nonce: u64) -> Result<i64, RelayError> {
    i64::try_from(nonce).map_err(|_| RelayError::BadRequest(format!("nonce {} out of range", nonce)))
}
