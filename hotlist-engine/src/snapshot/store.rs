//! Snapshot store.
//!
//! Owns every snapshot the engine has seen. Data fetching priority:
//! 1. In-memory map (fastest)
//! 2. Local SQLite database (persistent)
//! 3. Upstream adapter, at most one in-flight fetch per key
//!
//! Fetches run on a spawned task and are shared through a
//! [`futures::future::Shared`] handle, so a caller that gives up does not
//! cancel the fetch for everyone else waiting on it.

use chrono::{Duration, NaiveDate};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::persist::SnapshotDb;
use super::range::SnapshotRange;
use super::{Snapshot, SnapshotKey};
use crate::calendar::{format_trade_date, Clock, SystemClock, TradingCalendar};
use crate::error::{HotlistError, Result};
use crate::normalize::Normalizer;
use crate::source::{Category, FetchFilters, SourceAdapter, SourceId};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Snapshot>>>>;

/// Default freshness window for current-day snapshots.
pub const DEFAULT_FRESHNESS_SECS: u64 = 300;

/// Counters reported by [`SnapshotStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Snapshots held in memory
    pub entries: usize,
    /// Upstream fetches currently running
    pub in_flight: usize,
    /// Adapter calls made
    pub upstream_calls: u64,
    /// Lookups answered with a stale snapshot after an upstream failure
    pub fallbacks: u64,
    /// Snapshots loaded from the database
    pub db_hits: u64,
}

/// Cache of normalized snapshots over a [`SourceAdapter`].
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    adapter: Arc<dyn SourceAdapter>,
    calendar: Arc<dyn TradingCalendar>,
    clock: Arc<dyn Clock>,
    normalizer: Normalizer,
    db: Option<SnapshotDb>,
    freshness: Duration,
    filters: FetchFilters,
    memory: RwLock<HashMap<SnapshotKey, Arc<Snapshot>>>,
    in_flight: Mutex<HashMap<SnapshotKey, SharedFetch>>,
    upstream_calls: AtomicU64,
    fallbacks: AtomicU64,
    db_hits: AtomicU64,
}

/// Builder for [`SnapshotStore`].
pub struct SnapshotStoreBuilder {
    adapter: Arc<dyn SourceAdapter>,
    calendar: Arc<dyn TradingCalendar>,
    clock: Arc<dyn Clock>,
    normalizer: Normalizer,
    db: Option<SnapshotDb>,
    freshness: Duration,
    filters: FetchFilters,
}

impl SnapshotStoreBuilder {
    /// Clock used for freshness and settlement (default: wall clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist snapshots to this database.
    pub fn database(mut self, db: SnapshotDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// How long a current-day snapshot is served before refetching.
    pub fn freshness(mut self, freshness: std::time::Duration) -> Self {
        self.freshness = Duration::from_std(freshness).unwrap_or_else(|_| Duration::days(36_500));
        self
    }

    /// Filters passed to every adapter call.
    pub fn fetch_filters(mut self, filters: FetchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn build(self) -> SnapshotStore {
        SnapshotStore {
            inner: Arc::new(StoreInner {
                adapter: self.adapter,
                calendar: self.calendar,
                clock: self.clock,
                normalizer: self.normalizer,
                db: self.db,
                freshness: self.freshness,
                filters: self.filters,
                memory: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                upstream_calls: AtomicU64::new(0),
                fallbacks: AtomicU64::new(0),
                db_hits: AtomicU64::new(0),
            }),
        }
    }
}

impl SnapshotStore {
    /// Start building a store over an adapter and a trading calendar.
    pub fn builder(
        adapter: Arc<dyn SourceAdapter>,
        calendar: Arc<dyn TradingCalendar>,
    ) -> SnapshotStoreBuilder {
        SnapshotStoreBuilder {
            adapter,
            calendar,
            clock: Arc::new(SystemClock),
            normalizer: Normalizer::default(),
            db: None,
            freshness: Duration::seconds(DEFAULT_FRESHNESS_SECS as i64),
            filters: FetchFilters::default(),
        }
    }

    /// Snapshot for a key, fetching upstream when nothing usable is stored.
    ///
    /// Settled snapshots are returned as-is. When the upstream fetch fails
    /// and an older snapshot for the same key exists, that snapshot is
    /// returned instead of the error.
    pub async fn get_or_fetch(
        &self,
        source: SourceId,
        category: Category,
        trade_date: NaiveDate,
    ) -> Result<Arc<Snapshot>> {
        source.ensure_supports(category)?;
        let key = SnapshotKey::new(source, category, trade_date);

        if let Some(snapshot) = self.inner.memory_get(&key) {
            if !self.inner.needs_refresh(&snapshot) {
                debug!(key = %key, source = "memory", "Returning snapshot");
                return Ok(snapshot);
            }
        } else if let Some(snapshot) = self.inner.load_persisted(&key).await {
            if !self.inner.needs_refresh(&snapshot) {
                debug!(key = %key, source = "database", "Returning snapshot");
                return Ok(snapshot);
            }
        }

        if let Err(e) = self.inner.validate_trade_date(&key).await {
            return if e.is_rejection() {
                Err(e)
            } else {
                self.inner.fall_back(&key, e)
            };
        }

        match self.fetch_coalesced(key).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e @ HotlistError::UpstreamUnavailable { .. }) => self.inner.fall_back(&key, e),
            Err(e) => Err(e),
        }
    }

    /// Lazy ascending walk over trading days in `[start, end]`.
    pub fn get_range(
        &self,
        source: SourceId,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SnapshotRange> {
        source.ensure_supports(category)?;
        if start > end {
            return Err(HotlistError::invalid(format!(
                "range start {} is after end {}",
                format_trade_date(&start),
                format_trade_date(&end)
            )));
        }
        Ok(SnapshotRange::new(self.clone(), source, category, start, end))
    }

    /// Snapshot already held in memory, without any I/O.
    pub fn peek(&self, key: &SnapshotKey) -> Option<Arc<Snapshot>> {
        self.inner.memory_get(key)
    }

    /// Ask the calendar whether `date` had a session.
    pub async fn is_trading_day(
        &self,
        source: SourceId,
        category: Category,
        date: NaiveDate,
    ) -> Result<bool> {
        self.inner
            .calendar
            .is_trading_day(date)
            .await
            .map_err(|e| e.into_hotlist(source, category, date))
    }

    /// Current exchange date according to the store's clock.
    pub fn today(&self) -> NaiveDate {
        self.inner.clock.today()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self
            .inner
            .memory
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .map(|m| m.len())
            .unwrap_or_default();

        StoreStats {
            entries,
            in_flight,
            upstream_calls: self.inner.upstream_calls.load(Ordering::Relaxed),
            fallbacks: self.inner.fallbacks.load(Ordering::Relaxed),
            db_hits: self.inner.db_hits.load(Ordering::Relaxed),
        }
    }

    /// Join the running fetch for `key`, or start one.
    async fn fetch_coalesced(&self, key: SnapshotKey) -> Result<Arc<Snapshot>> {
        let fetch = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner());

            // A fetch may have finished between the memory check and here
            if let Some(snapshot) = self.inner.memory_get(&key) {
                if !self.inner.needs_refresh(&snapshot) {
                    return Ok(snapshot);
                }
            }

            match in_flight.get(&key) {
                Some(fetch) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    fetch.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let result = inner.fetch_and_store(key).await;
                        inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&key);
                        result
                    });

                    let fetch = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(HotlistError::UpstreamUnavailable {
                                source_id: key.source_id,
                                category: key.category,
                                trade_date: key.trade_date,
                                reason: format!("fetch task failed: {}", e),
                            }),
                        }
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }
}

impl StoreInner {
    fn memory_get(&self, key: &SnapshotKey) -> Option<Arc<Snapshot>> {
        self.memory.read().ok()?.get(key).cloned()
    }

    fn memory_put(&self, snapshot: Arc<Snapshot>) {
        let mut memory = self.memory.write().unwrap_or_else(|e| e.into_inner());
        memory.insert(snapshot.key, snapshot);
    }

    fn needs_refresh(&self, snapshot: &Snapshot) -> bool {
        snapshot.needs_refresh(self.clock.now(), self.freshness)
    }

    /// Load from the database into memory.
    async fn load_persisted(&self, key: &SnapshotKey) -> Option<Arc<Snapshot>> {
        let db = self.db.as_ref()?;
        match db.load(key).await {
            Ok(Some(snapshot)) => {
                self.db_hits.fetch_add(1, Ordering::Relaxed);
                let snapshot = Arc::new(snapshot);
                self.memory_put(Arc::clone(&snapshot));
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read snapshot database");
                None
            }
        }
    }

    /// Reject dates that can never have data before going upstream.
    async fn validate_trade_date(&self, key: &SnapshotKey) -> Result<()> {
        let today = self.clock.today();
        if key.trade_date > today {
            return Err(HotlistError::invalid(format!(
                "{}: trade date {} is in the future",
                key,
                format_trade_date(&key.trade_date)
            )));
        }

        let open = self
            .calendar
            .is_trading_day(key.trade_date)
            .await
            .map_err(|e| e.into_hotlist(key.source_id, key.category, key.trade_date))?;
        if !open {
            return Err(HotlistError::invalid(format!(
                "{}: {} is not a trading day",
                key,
                format_trade_date(&key.trade_date)
            )));
        }
        Ok(())
    }

    /// Serve the last known snapshot for `key` in place of `error`.
    fn fall_back(&self, key: &SnapshotKey, error: HotlistError) -> Result<Arc<Snapshot>> {
        match self.memory_get(key) {
            Some(snapshot) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    error = %error,
                    fetched_at = %snapshot.fetched_at,
                    "Upstream failed, serving last known snapshot"
                );
                Ok(snapshot)
            }
            None => Err(error),
        }
    }

    async fn fetch_and_store(&self, key: SnapshotKey) -> Result<Arc<Snapshot>> {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);
        info!(key = %key, adapter = self.adapter.name(), "Fetching snapshot from upstream");

        let table = self
            .adapter
            .fetch(key.source_id, key.category, key.trade_date, &self.filters)
            .await
            .map_err(|e| e.into_hotlist(key.source_id, key.category, key.trade_date))?;

        let batch = self
            .normalizer
            .normalize(key.source_id, key.category, key.trade_date, &table);

        let snapshot = Arc::new(Snapshot {
            key,
            entities: batch.entities,
            fetched_at: self.clock.now(),
            is_complete: !table.has_more,
            dropped: batch.dropped,
        });

        if !snapshot.is_complete {
            warn!(key = %key, rows = table.len(), "Vendor reported more rows than were returned");
        }

        if let Some(db) = &self.db {
            if let Err(e) = db.save(&snapshot).await {
                warn!(key = %key, error = %e, "Failed to persist snapshot");
            }
        }

        self.memory_put(Arc::clone(&snapshot));
        info!(
            key = %key,
            entities = snapshot.len(),
            dropped = snapshot.dropped,
            "Snapshot stored"
        );
        Ok(snapshot)
    }
}
