//! Durable checkpoint store (SQLite)
//!
//! Tables (see `/sql/` directory):
//! - `watermarks` - UPSERT per instrument, never moved backwards
//! - `alert_deliveries` - one ledger row per logical alert
//!
//! The watermark table lets a restarted pipeline drop replayed contributions
//! to windows that already closed. The ledger makes notification delivery
//! at-most-once: a row is claimed before the notifier is called and an
//! existing row suppresses the send.

use super::types::AlertNotice;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema files in execution order, embedded at compile time
const MIGRATIONS: &[(&str, &str)] = &[
    ("01_watermarks.sql", include_str!("../../sql/01_watermarks.sql")),
    (
        "02_alert_deliveries.sql",
        include_str!("../../sql/02_alert_deliveries.sql"),
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint connection lock poisoned")]
    Poisoned,

    #[error("unknown delivery status in ledger: {0}")]
    UnknownStatus(String),
}

/// Ledger state of one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Claimed, send in progress (or interrupted by a crash)
    Pending,
    Delivered,
    /// Retries exhausted; never re-sent
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, CheckpointError> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(CheckpointError::UnknownStatus(other.to_string())),
        }
    }
}

/// Run the embedded schema migrations
///
/// All statements use `IF NOT EXISTS`, so running them on every start is safe.
pub fn run_schema_migrations(conn: &Connection) -> Result<(), CheckpointError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    Ok(())
}

#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint database and apply migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ Checkpoint store ready: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CheckpointError> {
        self.conn.lock().map_err(|_| CheckpointError::Poisoned)
    }

    /// All persisted watermarks keyed by instrument
    pub fn load_watermarks(&self) -> Result<HashMap<String, i64>, CheckpointError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT instrument, watermark_ms FROM watermarks")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut watermarks = HashMap::new();
        for row in rows {
            let (instrument, watermark_ms) = row?;
            watermarks.insert(instrument, watermark_ms);
        }
        Ok(watermarks)
    }

    /// Persist watermarks in one transaction
    ///
    /// A stored watermark is only replaced by a larger one.
    pub fn save_watermarks(&self, watermarks: &HashMap<String, i64>) -> Result<usize, CheckpointError> {
        if watermarks.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO watermarks (instrument, watermark_ms, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(instrument) DO UPDATE SET
                    watermark_ms = MAX(watermark_ms, excluded.watermark_ms),
                    updated_at = excluded.updated_at
                "#,
            )?;
            for (instrument, watermark_ms) in watermarks {
                stmt.execute(params![instrument, watermark_ms, now])?;
            }
        }
        tx.commit()?;

        Ok(watermarks.len())
    }

    /// Claim the ledger row for an alert
    ///
    /// Returns true when this call created the row, i.e. the caller owns the
    /// delivery. False means the alert was already claimed earlier.
    pub fn claim_alert(&self, alert: &AlertNotice) -> Result<bool, CheckpointError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO alert_deliveries (
                idempotency_key, ticker, window_end_ms, vwap, action,
                status, attempts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
            "#,
            params![
                alert.idempotency_key(),
                alert.instrument,
                alert.window_end_ms(),
                alert.vwap,
                alert.action.as_str(),
                DeliveryStatus::Pending.as_str(),
                now,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Record the outcome of a delivery attempt sequence
    pub fn mark_alert(
        &self,
        idempotency_key: &str,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), CheckpointError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE alert_deliveries SET status = ?1, attempts = ?2, updated_at = ?3
             WHERE idempotency_key = ?4",
            params![status.as_str(), attempts, now, idempotency_key],
        )?;
        Ok(())
    }

    pub fn alert_status(&self, idempotency_key: &str) -> Result<Option<DeliveryStatus>, CheckpointError> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM alert_deliveries WHERE idempotency_key = ?1",
                [idempotency_key],
                |row| row.get(0),
            )
            .optional()?;

        status.as_deref().map(DeliveryStatus::parse).transpose()
    }

    pub fn count_alerts(&self, status: DeliveryStatus) -> Result<i64, CheckpointError> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM alert_deliveries WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{millis_to_utc, Action};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path().join("nested/checkpoint.db")).unwrap();
        (dir, store)
    }

    fn alert(instrument: &str, end_ms: i64) -> AlertNotice {
        AlertNotice {
            instrument: instrument.to_string(),
            t: millis_to_utc(end_ms).unwrap(),
            vwap: 105.0,
            action: Action::Sell,
        }
    }

    #[test]
    fn test_watermarks_roundtrip_and_never_regress() {
        let (_dir, store) = open_store();
        assert!(store.load_watermarks().unwrap().is_empty());

        let mut batch = HashMap::new();
        batch.insert("AAPL".to_string(), 120_000);
        batch.insert("MSFT".to_string(), 60_000);
        assert_eq!(store.save_watermarks(&batch).unwrap(), 2);

        // An older checkpoint flushed late must not roll AAPL back
        let mut stale = HashMap::new();
        stale.insert("AAPL".to_string(), 60_000);
        store.save_watermarks(&stale).unwrap();

        let loaded = store.load_watermarks().unwrap();
        assert_eq!(loaded.get("AAPL"), Some(&120_000));
        assert_eq!(loaded.get("MSFT"), Some(&60_000));
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.db");

        {
            let store = CheckpointStore::open(&path).unwrap();
            let mut batch = HashMap::new();
            batch.insert("AAPL".to_string(), 600_000);
            store.save_watermarks(&batch).unwrap();
            assert!(store.claim_alert(&alert("AAPL", 600_000)).unwrap());
        }

        let store = CheckpointStore::open(&path).unwrap();
        assert_eq!(store.load_watermarks().unwrap().get("AAPL"), Some(&600_000));
        assert!(!store.claim_alert(&alert("AAPL", 600_000)).unwrap());
    }

    #[test]
    fn test_claim_is_exclusive_per_key() {
        let (_dir, store) = open_store();

        assert!(store.claim_alert(&alert("AAPL", 60_000)).unwrap());
        assert!(!store.claim_alert(&alert("AAPL", 60_000)).unwrap());
        assert!(store.claim_alert(&alert("AAPL", 120_000)).unwrap());
        assert!(store.claim_alert(&alert("MSFT", 60_000)).unwrap());

        assert_eq!(
            store.alert_status("AAPL:60000").unwrap(),
            Some(DeliveryStatus::Pending)
        );
        assert_eq!(store.alert_status("GOOG:60000").unwrap(), None);
    }

    #[test]
    fn test_mark_alert_updates_status() {
        let (_dir, store) = open_store();
        store.claim_alert(&alert("AAPL", 60_000)).unwrap();
        store.claim_alert(&alert("MSFT", 60_000)).unwrap();

        store.mark_alert("AAPL:60000", DeliveryStatus::Delivered, 1).unwrap();
        store.mark_alert("MSFT:60000", DeliveryStatus::Failed, 5).unwrap();

        assert_eq!(
            store.alert_status("AAPL:60000").unwrap(),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(store.count_alerts(DeliveryStatus::Failed).unwrap(), 1);
        assert_eq!(store.count_alerts(DeliveryStatus::Pending).unwrap(), 0);
    }
}
