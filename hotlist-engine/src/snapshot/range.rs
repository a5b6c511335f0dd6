//! Lazy day-by-day walk over a snapshot range.

use chrono::NaiveDate;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::debug;

use super::store::SnapshotStore;
use super::Snapshot;
use crate::error::HotlistError;
use crate::source::{Category, SourceId};

/// One trading day of a [`SnapshotRange`].
#[derive(Debug, Clone)]
pub enum DaySnapshot {
    Data(Arc<Snapshot>),
    /// The day had a session but no snapshot could be produced
    NoData {
        trade_date: NaiveDate,
        reason: HotlistError,
    },
}

impl DaySnapshot {
    pub fn trade_date(&self) -> NaiveDate {
        match self {
            Self::Data(snapshot) => snapshot.key.trade_date,
            Self::NoData { trade_date, .. } => *trade_date,
        }
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Self::Data(snapshot) => Some(snapshot),
            Self::NoData { .. } => None,
        }
    }
}

/// Ascending, finite sequence of snapshots for `[start, end]`.
///
/// Nothing is fetched until [`next_day`](Self::next_day) is called, and
/// non-trading days are skipped. [`restart`](Self::restart) rewinds to the
/// start; days already fetched come back from the store.
pub struct SnapshotRange {
    store: SnapshotStore,
    source: SourceId,
    category: Category,
    start: NaiveDate,
    end: NaiveDate,
    cursor: Option<NaiveDate>,
}

impl SnapshotRange {
    pub(crate) fn new(
        store: SnapshotStore,
        source: SourceId,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            store,
            source,
            category,
            start,
            end,
            cursor: Some(start),
        }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        (self.start, self.end)
    }

    /// Advance to the next trading day.
    pub async fn next_day(&mut self) -> Option<DaySnapshot> {
        while let Some(date) = self.cursor.filter(|d| *d <= self.end) {
            self.cursor = date.succ_opt();

            match self.store.is_trading_day(self.source, self.category, date).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(source = %self.source, %date, "Skipping non-trading day");
                    continue;
                }
                Err(reason) => {
                    return Some(DaySnapshot::NoData {
                        trade_date: date,
                        reason,
                    })
                }
            }

            let day = match self.store.get_or_fetch(self.source, self.category, date).await {
                Ok(snapshot) => DaySnapshot::Data(snapshot),
                Err(reason) => DaySnapshot::NoData {
                    trade_date: date,
                    reason,
                },
            };
            return Some(day);
        }
        None
    }

    /// Rewind to the first day.
    pub fn restart(&mut self) {
        self.cursor = Some(self.start);
    }

    /// Drain the remaining days.
    pub async fn collect_all(&mut self) -> Vec<DaySnapshot> {
        let mut days = Vec::new();
        while let Some(day) = self.next_day().await {
            days.push(day);
        }
        days
    }

    /// Consume into a [`Stream`] of days.
    pub fn into_stream(self) -> impl Stream<Item = DaySnapshot> {
        stream::unfold(self, |mut range| async move {
            let day = range.next_day().await?;
            Some((day, range))
        })
    }
}
