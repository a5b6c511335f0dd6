//! Hotlist Engine
//!
//! Aggregates the "hot lists" Chinese A-share platforms publish (limit-up
//! boards, popularity rankings, concept sectors), normalizes them to a
//! comparable form, and answers cross-source questions about them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Query Façade                                │
//! │          query_hotlist / query_intersection / query_trajectory      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Intersection   │  │  Snapshot       │  │  Ranking        │     │
//! │  │  / Trend Engine │──│  Store          │──│  Normalizer     │     │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────────┘     │
//! │                                │                                    │
//! │                       ┌────────┴────────┐                           │
//! │                       │ Source Adapter  │  (Tushare Pro)            │
//! │                       └─────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Snapshots
//! One source's ranking for one category on one trade date. Past-day
//! snapshots are immutable once settled; current-day snapshots are
//! refetched after a freshness window.
//!
//! ## Canonical codes
//! - Securities: the exchange-qualified code (`600000.SH`)
//! - Sectors: `SECTOR:<normalized name>`
//! - Anything else: `<source>:<code>`, never matched across sources

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod calendar;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod query;
pub mod snapshot;
pub mod source;

use anyhow::{Context, Result};
use hotlist_common::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use calendar::{
    format_trade_date, parse_trade_date, Clock, FixedClock, SystemClock, TradingCalendar,
    TushareCalendar, WeekdayCalendar,
};
pub use engine::{
    intersect, trajectory, IntersectionMember, IntersectionResult, Trajectory, TrajectoryPoint,
    TrajectoryStep,
};
pub use error::{ErrorKind, HotlistError};
pub use normalize::{CanonicalResolver, EntityFlag, NormalizedEntity, Normalizer, RankedEntity};
pub use query::{DateSpec, HotlistFilters, QueryFacade, QueryFailure, QueryLimits, QueryOutput, Table};
pub use snapshot::{DaySnapshot, Snapshot, SnapshotDb, SnapshotKey, SnapshotRange, SnapshotStore};
pub use source::{
    Category, FetchFilters, RawTable, SourceAdapter, SourceError, SourceId, TushareAdapter,
    TushareClient,
};

/// Wired-up engine: adapter, calendar, store and façade.
pub struct HotlistService {
    config: Config,
    facade: QueryFacade,
}

impl HotlistService {
    /// Build the service against Tushare Pro from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let token = config
            .require_tushare_token()
            .map_err(|e| anyhow::anyhow!("{}", e))?
            .to_string();

        let client = Arc::new(TushareClient::new(token, &config.tushare));
        let adapter: Arc<dyn SourceAdapter> = Arc::new(TushareAdapter::new(Arc::clone(&client)));
        let calendar: Arc<dyn TradingCalendar> = if config.calendar.offline {
            Arc::new(WeekdayCalendar::with_holidays(
                config.calendar.holidays.iter().copied(),
            ))
        } else {
            Arc::new(TushareCalendar::new(client))
        };

        Self::with_parts(config, adapter, calendar, Arc::new(SystemClock))
    }

    /// Build the service around caller-supplied collaborators.
    pub fn with_parts(
        config: Config,
        adapter: Arc<dyn SourceAdapter>,
        calendar: Arc<dyn TradingCalendar>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let resolver = CanonicalResolver::with_aliases(&config.normalizer.sector_aliases);
        let mut builder = SnapshotStore::builder(adapter, calendar)
            .clock(clock)
            .normalizer(Normalizer::new(resolver))
            .freshness(Duration::from_secs(config.store.freshness_secs));

        if !config.store.in_memory {
            let path = config.database_path();
            let db = SnapshotDb::open(&path)
                .with_context(|| format!("Failed to open snapshot database {}", path.display()))?;
            builder = builder.database(db);
        }

        let facade = QueryFacade::new(builder.build(), QueryLimits::from(&config.store));
        info!(
            in_memory = config.store.in_memory,
            freshness_secs = config.store.freshness_secs,
            aliases = config.normalizer.sector_aliases.len(),
            "Hotlist service ready"
        );

        Ok(Self { config, facade })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn facade(&self) -> &QueryFacade {
        &self.facade
    }

    pub fn store(&self) -> &SnapshotStore {
        self.facade.store()
    }
}
