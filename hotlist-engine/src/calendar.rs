//! Trading calendar and market clock.
//!
//! The engine never decides on its own whether a date had a session; it asks
//! a [`TradingCalendar`]. Two implementations are provided:
//! - [`WeekdayCalendar`]: Monday to Friday minus configured holidays (offline)
//! - [`TushareCalendar`]: the vendor's `trade_cal` table, cached per year
//!
//! Dates cross the public boundary as `YYYYMMDD` strings.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::debug;

use crate::error::HotlistError;
use crate::source::tushare::TushareClient;
use crate::source::SourceError;

/// Wire format for trade dates.
pub const TRADE_DATE_FORMAT: &str = "%Y%m%d";

/// Offset of exchange local time (Beijing) from UTC, in hours.
const MARKET_UTC_OFFSET_HOURS: i64 = 8;

/// Parse a `YYYYMMDD` trade date.
pub fn parse_trade_date(s: &str) -> Result<NaiveDate, HotlistError> {
    let s = s.trim();
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HotlistError::invalid(format!(
            "trade date must be 8 digits (YYYYMMDD), got '{}'",
            s
        )));
    }
    NaiveDate::parse_from_str(s, TRADE_DATE_FORMAT)
        .map_err(|_| HotlistError::invalid(format!("'{}' is not a calendar date", s)))
}

/// Format a date as `YYYYMMDD`.
pub fn format_trade_date(date: &NaiveDate) -> String {
    date.format(TRADE_DATE_FORMAT).to_string()
}

/// Calendar date at the exchange for a UTC instant.
pub fn market_date(instant: DateTime<Utc>) -> NaiveDate {
    (instant + Duration::hours(MARKET_UTC_OFFSET_HOURS)).date_naive()
}

// ============================================================================
// Trading Calendar
// ============================================================================

/// Answers whether a date had (or will have) a trading session.
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    /// Check a single date.
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, SourceError>;
}

/// Weekday calendar with an explicit holiday list.
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl WeekdayCalendar {
    /// Calendar with no holidays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calendar that also closes on the given weekdays.
    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    fn is_open(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, SourceError> {
        Ok(self.is_open(date))
    }
}

/// Vendor-backed calendar (SSE sessions), one `trade_cal` request per year.
pub struct TushareCalendar {
    client: Arc<TushareClient>,
    years: AsyncRwLock<HashMap<i32, Arc<HashSet<NaiveDate>>>>,
    /// Held while a year is being fetched so concurrent misses share one call
    loading: AsyncMutex<()>,
}

impl TushareCalendar {
    /// Create a calendar over a shared client.
    pub fn new(client: Arc<TushareClient>) -> Self {
        Self {
            client,
            years: AsyncRwLock::new(HashMap::new()),
            loading: AsyncMutex::new(()),
        }
    }

    async fn open_days(&self, year: i32) -> Result<Arc<HashSet<NaiveDate>>, SourceError> {
        if let Some(days) = self.years.read().await.get(&year) {
            return Ok(Arc::clone(days));
        }

        let _loading = self.loading.lock().await;
        if let Some(days) = self.years.read().await.get(&year) {
            return Ok(Arc::clone(days));
        }

        let mut params = BTreeMap::new();
        params.insert("exchange".to_string(), "SSE".to_string());
        params.insert("start_date".to_string(), format!("{}0101", year));
        params.insert("end_date".to_string(), format!("{}1231", year));

        let table = self
            .client
            .query("trade_cal", &params, &["cal_date", "is_open"])
            .await?;

        let days: HashSet<NaiveDate> = table
            .rows()
            .filter(|row| row.u32("is_open") == Some(1))
            .filter_map(|row| row.str("cal_date"))
            .filter_map(|s| NaiveDate::parse_from_str(&s, TRADE_DATE_FORMAT).ok())
            .collect();

        if days.is_empty() {
            return Err(SourceError::Malformed(format!(
                "trade_cal returned no open sessions for {}",
                year
            )));
        }

        debug!(year, sessions = days.len(), "Loaded trading calendar");
        let days = Arc::new(days);
        self.years.write().await.insert(year, Arc::clone(&days));
        Ok(days)
    }
}

#[async_trait]
impl TradingCalendar for TushareCalendar {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, SourceError> {
        Ok(self.open_days(date.year()).await?.contains(&date))
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for freshness and settlement decisions.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date at the exchange.
    fn today(&self) -> NaiveDate {
        market_date(self.now())
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock frozen at an instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Clock frozen at exchange-local `hour:minute` on `date`.
    pub fn at_market(date: NaiveDate, hour: i64, minute: i64) -> Self {
        let local = date.and_time(NaiveTime::MIN)
            + Duration::hours(hour)
            + Duration::minutes(minute);
        let utc = local - Duration::hours(MARKET_UTC_OFFSET_HOURS);
        Self::new(DateTime::from_naive_utc_and_offset(utc, Utc))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
