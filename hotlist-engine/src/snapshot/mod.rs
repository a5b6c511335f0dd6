//! Snapshot storage.
//!
//! A snapshot is one source's normalized ranking for one category on one
//! trade date. Lookups go through three tiers:
//! 1. In-memory map (fastest)
//! 2. Local SQLite database (persistent, optional)
//! 3. Upstream adapter (coalesced per key)

pub mod persist;
pub mod range;
pub mod store;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::calendar::{format_trade_date, market_date};
use crate::normalize::NormalizedEntity;
use crate::source::{Category, SourceId};

pub use persist::SnapshotDb;
pub use range::{DaySnapshot, SnapshotRange};
pub use store::{SnapshotStore, SnapshotStoreBuilder, StoreStats};

/// Identity of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub source_id: SourceId,
    pub category: Category,
    pub trade_date: NaiveDate,
}

impl SnapshotKey {
    pub fn new(source_id: SourceId, category: Category, trade_date: NaiveDate) -> Self {
        Self {
            source_id,
            category,
            trade_date,
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_id,
            self.category,
            format_trade_date(&self.trade_date)
        )
    }
}

/// One source's ranking for one category and date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: SnapshotKey,
    /// Ordered by rank ascending, unique by entity code
    pub entities: Vec<NormalizedEntity>,
    pub fetched_at: DateTime<Utc>,
    /// Vendor reported no further pages
    pub is_complete: bool,
    /// Rows dropped during normalization
    #[serde(default)]
    pub dropped: usize,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Past-day snapshot captured after its session day ended.
    ///
    /// Settled snapshots are immutable; anything captured on the trade date
    /// itself may be an intraday picture.
    pub fn is_settled(&self, today: NaiveDate) -> bool {
        self.key.trade_date < today && market_date(self.fetched_at) > self.key.trade_date
    }

    /// Whether a lookup at `now` should go back upstream.
    pub fn needs_refresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        let today = market_date(now);
        if self.is_settled(today) {
            false
        } else if self.key.trade_date >= today {
            now - self.fetched_at > freshness
        } else {
            true
        }
    }
}
