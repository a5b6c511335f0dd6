//! SQLite persistence for snapshots.
//!
//! One row per snapshot key; entities are stored as a JSON array so the
//! schema does not follow every vendor field.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Snapshot, SnapshotKey};
use crate::calendar::format_trade_date;
use crate::error::{HotlistError, Result};
use crate::normalize::NormalizedEntity;

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    source TEXT NOT NULL,
    category TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    is_complete INTEGER NOT NULL,
    dropped INTEGER NOT NULL DEFAULT 0,
    entities_json TEXT NOT NULL,
    PRIMARY KEY (source, category, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_trade_date
ON snapshots(trade_date DESC);
"#;

/// Snapshot database.
pub struct SnapshotDb {
    conn: Mutex<Connection>,
}

impl SnapshotDb {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HotlistError::Storage(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        let db = Self::init(conn)?;
        info!(path = %path.display(), "Snapshot database opened");
        Ok(db)
    }

    /// Database that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace the row for the snapshot's key.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let entities_json = serde_json::to_string(&snapshot.entities)?;
        let key = &snapshot.key;

        let db = self.conn.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO snapshots
             (source, category, trade_date, fetched_at, is_complete, dropped, entities_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.source_id.as_str(),
                key.category.as_str(),
                format_trade_date(&key.trade_date),
                snapshot.fetched_at.to_rfc3339(),
                snapshot.is_complete,
                snapshot.dropped as i64,
                entities_json,
            ],
        )?;

        debug!(key = %key, entities = snapshot.len(), "Snapshot persisted");
        Ok(())
    }

    /// Load the stored snapshot for a key.
    pub async fn load(&self, key: &SnapshotKey) -> Result<Option<Snapshot>> {
        let row: Option<(String, bool, i64, String)> = {
            let db = self.conn.lock().await;
            db.query_row(
                "SELECT fetched_at, is_complete, dropped, entities_json
                 FROM snapshots
                 WHERE source = ?1 AND category = ?2 AND trade_date = ?3",
                params![
                    key.source_id.as_str(),
                    key.category.as_str(),
                    format_trade_date(&key.trade_date),
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?
        };

        let Some((fetched_at, is_complete, dropped, entities_json)) = row else {
            return Ok(None);
        };

        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| HotlistError::Storage(format!("{}: bad fetched_at: {}", key, e)))?
            .with_timezone(&Utc);
        let entities: Vec<NormalizedEntity> = serde_json::from_str(&entities_json)?;

        Ok(Some(Snapshot {
            key: *key,
            entities,
            fetched_at,
            is_complete,
            dropped: usize::try_from(dropped).unwrap_or(0),
        }))
    }

}
