//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use hotlist_engine::calendar::{Clock, FixedClock, WeekdayCalendar};
use hotlist_engine::{
    Category, FetchFilters, RawTable, SnapshotKey, SnapshotStore, SourceAdapter, SourceError,
    SourceId,
};

pub const A: &str = "600001.SH";
pub const B: &str = "600002.SH";
pub const C: &str = "000003.SZ";
pub const D: &str = "300004.SZ";
pub const X: &str = "600999.SH";

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// `ts_code, name` table in rank order.
pub fn table(rows: &[(&str, &str)]) -> RawTable {
    let mut table = RawTable::new(&["ts_code", "name"]);
    for (code, name) in rows {
        table.push_row(vec![json!(code), json!(name)]);
    }
    table
}

/// Table of codes named after themselves.
pub fn codes(codes: &[&str]) -> RawTable {
    let rows: Vec<(&str, &str)> = codes.iter().map(|c| (*c, *c)).collect();
    table(&rows)
}

// ============================================================================
// Scripted Adapter
// ============================================================================

/// Adapter answering from a per-key script. Unscripted keys fail.
pub struct ScriptedAdapter {
    script: Mutex<HashMap<SnapshotKey, Result<RawTable, SourceError>>>,
    log: Mutex<Vec<SnapshotKey>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, source: SourceId, category: Category, date: NaiveDate, table: RawTable) {
        self.script
            .lock()
            .unwrap()
            .insert(SnapshotKey::new(source, category, date), Ok(table));
    }

    pub fn fail(&self, source: SourceId, category: Category, date: NaiveDate) {
        self.script.lock().unwrap().insert(
            SnapshotKey::new(source, category, date),
            Err(SourceError::Network("connection reset by peer".into())),
        );
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, source: SourceId, category: Category, date: NaiveDate) -> usize {
        let key = SnapshotKey::new(source, category, date);
        self.log.lock().unwrap().iter().filter(|k| **k == key).count()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(
        &self,
        source: SourceId,
        category: Category,
        trade_date: NaiveDate,
        _filters: &FetchFilters,
    ) -> Result<RawTable, SourceError> {
        let key = SnapshotKey::new(source, category, trade_date);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(key);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().get(&key).cloned();
        scripted.unwrap_or_else(|| {
            Err(SourceError::Vendor {
                code: -1,
                message: format!("no script for {}", key),
            })
        })
    }
}

// ============================================================================
// Store Fixtures
// ============================================================================

/// Store over `adapter` with a weekday calendar and a clock frozen at
/// `today` 20:00 exchange time.
pub fn store_at(
    adapter: Arc<ScriptedAdapter>,
    today: NaiveDate,
    holidays: &[NaiveDate],
) -> (SnapshotStore, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::at_market(today, 20, 0));
    let calendar = Arc::new(WeekdayCalendar::with_holidays(holidays.iter().copied()));
    let store = SnapshotStore::builder(adapter, calendar)
        .clock(clock.clone() as Arc<dyn Clock>)
        .build();
    (store, clock)
}
