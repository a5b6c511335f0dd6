//! Upstream hotlist sources.
//!
//! Every platform is reached through the [`SourceAdapter`] contract, which
//! returns the vendor's tabular payload untouched. Field mapping happens later
//! in the normalizer so adapters stay stateless transport.
//!
//! # Sources
//! - **kpl** (开盘啦): concept library and the limit-up/down, exploded and
//!   auction boards
//! - **ths** (同花顺): hot list (stocks and concept sectors) and limit pools
//! - **eastmoney** (东方财富): popularity list and concept sector index

pub mod rate_limiter;
pub mod tushare;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::HotlistError;

pub use tushare::{TushareAdapter, TushareClient};

// ============================================================================
// Source and Category Enums
// ============================================================================

/// Upstream platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// 开盘啦
    Kpl,
    /// 同花顺
    Ths,
    /// 东方财富
    Eastmoney,
}

impl SourceId {
    /// All known sources.
    pub const ALL: [SourceId; 3] = [SourceId::Kpl, SourceId::Ths, SourceId::Eastmoney];

    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kpl => "kpl",
            Self::Ths => "ths",
            Self::Eastmoney => "eastmoney",
        }
    }

    /// Categories this source publishes.
    pub const fn categories(&self) -> &'static [Category] {
        match self {
            Self::Kpl => &[
                Category::Concept,
                Category::LimitUp,
                Category::LimitDown,
                Category::Exploded,
                Category::Auction,
            ],
            Self::Ths => &[
                Category::Concept,
                Category::HotStock,
                Category::LimitUp,
                Category::LimitDown,
                Category::Exploded,
            ],
            Self::Eastmoney => &[Category::Concept, Category::HotStock],
        }
    }

    /// Whether this source publishes `category`.
    pub fn supports(&self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    /// Reject unsupported pairs before any I/O.
    pub fn ensure_supports(&self, category: Category) -> Result<(), HotlistError> {
        if self.supports(category) {
            Ok(())
        } else {
            Err(HotlistError::UnsupportedCategory {
                source_id: *self,
                category,
            })
        }
    }

    /// Vendor endpoint serving `category` for this source.
    pub fn endpoint(&self, category: Category) -> Option<Endpoint> {
        use Category::*;

        let endpoint = match (self, category) {
            (Self::Kpl, Concept) => Endpoint::new("kpl_concept", &[], KPL_CONCEPT_FIELDS),
            (Self::Kpl, LimitUp) => Endpoint::new("kpl_list", &[("tag", "涨停")], KPL_LIST_FIELDS),
            (Self::Kpl, LimitDown) => Endpoint::new("kpl_list", &[("tag", "跌停")], KPL_LIST_FIELDS),
            (Self::Kpl, Exploded) => Endpoint::new("kpl_list", &[("tag", "炸板")], KPL_LIST_FIELDS),
            (Self::Kpl, Auction) => Endpoint::new("kpl_list", &[("tag", "竞价")], KPL_LIST_FIELDS),
            (Self::Ths, HotStock) => Endpoint::new(
                "ths_hot",
                &[("market", "热股"), ("is_new", "Y")],
                THS_HOT_FIELDS,
            ),
            (Self::Ths, Concept) => Endpoint::new(
                "ths_hot",
                &[("market", "概念板块"), ("is_new", "Y")],
                THS_HOT_FIELDS,
            ),
            (Self::Ths, LimitUp) => {
                Endpoint::new("limit_list_ths", &[("limit_type", "涨停池")], THS_LIMIT_FIELDS)
            }
            (Self::Ths, LimitDown) => {
                Endpoint::new("limit_list_ths", &[("limit_type", "跌停池")], THS_LIMIT_FIELDS)
            }
            (Self::Ths, Exploded) => {
                Endpoint::new("limit_list_ths", &[("limit_type", "炸板池")], THS_LIMIT_FIELDS)
            }
            (Self::Eastmoney, HotStock) => Endpoint::new(
                "dc_hot",
                &[("market", "A股市场"), ("hot_type", "人气榜"), ("is_new", "Y")],
                DC_HOT_FIELDS,
            ),
            (Self::Eastmoney, Concept) => Endpoint::new("dc_index", &[], DC_INDEX_FIELDS),
            _ => return None,
        };
        Some(endpoint)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = HotlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kpl" => Ok(Self::Kpl),
            "ths" => Ok(Self::Ths),
            "eastmoney" | "dc" | "em" => Ok(Self::Eastmoney),
            other => Err(HotlistError::invalid(format!(
                "unknown source '{}' (expected kpl, ths or eastmoney)",
                other
            ))),
        }
    }
}

/// Ranking category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Concept/sector ranking
    Concept,
    /// Popularity ranking of individual stocks
    HotStock,
    /// Stocks closing at the upper price limit
    LimitUp,
    /// Stocks closing at the lower price limit
    LimitDown,
    /// Stocks that touched the upper limit and fell back ("炸板")
    Exploded,
    /// Opening call auction strength
    Auction,
}

impl Category {
    /// All known categories.
    pub const ALL: [Category; 6] = [
        Category::Concept,
        Category::HotStock,
        Category::LimitUp,
        Category::LimitDown,
        Category::Exploded,
        Category::Auction,
    ];

    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::HotStock => "hot-stock",
            Self::LimitUp => "limit-up",
            Self::LimitDown => "limit-down",
            Self::Exploded => "exploded",
            Self::Auction => "auction",
        }
    }

    /// Entities are sectors rather than listed securities.
    pub const fn is_sector(&self) -> bool {
        matches!(self, Self::Concept)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = HotlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == key)
            .or(match key.as_str() {
                "sector" => Some(Self::Concept),
                "hot" => Some(Self::HotStock),
                _ => None,
            })
            .ok_or_else(|| {
                HotlistError::invalid(format!(
                    "unknown category '{}' (expected one of: {})",
                    s.trim(),
                    Self::ALL.map(|c| c.as_str()).join(", ")
                ))
            })
    }
}

// ============================================================================
// Vendor Endpoints
// ============================================================================

const KPL_CONCEPT_FIELDS: &[&str] = &["ts_code", "name", "trade_date", "z_t_num", "up_num"];

const KPL_LIST_FIELDS: &[&str] = &[
    "ts_code", "name", "trade_date", "lu_time", "ld_time", "open_time", "last_time", "lu_desc",
    "tag", "theme", "net_change", "bid_amount", "status", "bid_change", "bid_turnover",
    "lu_bid_vol", "pct_chg", "bid_pct_chg", "rt_pct_chg", "limit_order", "amount",
    "turnover_rate", "free_float", "lu_limit_order",
];

const THS_HOT_FIELDS: &[&str] = &[
    "trade_date", "data_type", "ts_code", "ts_name", "rank", "pct_change", "current_price",
    "concept", "rank_reason", "hot", "rank_time",
];

const THS_LIMIT_FIELDS: &[&str] = &[
    "trade_date", "ts_code", "name", "price", "pct_chg", "open_num", "lu_desc", "limit_type",
    "tag", "status", "limit_order", "limit_amount", "turnover_rate", "free_float",
    "lu_limit_order", "limit_up_suc_rate", "turnover", "market_type",
];

const DC_HOT_FIELDS: &[&str] = &[
    "trade_date", "data_type", "ts_code", "ts_name", "rank", "pct_change", "current_price",
    "hot", "concept", "rank_time",
];

const DC_INDEX_FIELDS: &[&str] = &[
    "ts_code", "trade_date", "name", "leading", "leading_code", "pct_change", "leading_pct",
    "total_mv", "turnover_rate", "up_num", "down_num",
];

/// A vendor API call that yields one source/category ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Vendor API name
    pub api_name: &'static str,
    /// Fixed selector parameters
    pub params: &'static [(&'static str, &'static str)],
    /// Requested output fields
    pub fields: &'static [&'static str],
}

impl Endpoint {
    const fn new(
        api_name: &'static str,
        params: &'static [(&'static str, &'static str)],
        fields: &'static [&'static str],
    ) -> Self {
        Self {
            api_name,
            params,
            fields,
        }
    }
}

/// Optional request narrowing passed through to the vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchFilters {
    /// Maximum rows per request
    pub limit: Option<usize>,
    /// Single entity code
    pub ts_code: Option<String>,
    /// Entity name
    pub name: Option<String>,
}

// ============================================================================
// Raw Payload
// ============================================================================

/// Column-oriented vendor payload: field names plus positional rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub fields: Vec<String>,
    pub items: Vec<Vec<Value>>,
    /// More rows exist beyond this page
    #[serde(default)]
    pub has_more: bool,
}

impl RawTable {
    /// Empty table with the given columns.
    pub fn new(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            items: Vec::new(),
            has_more: false,
        }
    }

    /// Append a row (positional, same order as `fields`).
    pub fn push_row(&mut self, row: Vec<Value>) {
        self.items.push(row);
    }

    /// Builder form of [`push_row`](Self::push_row).
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.push_row(row);
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate rows with by-name access.
    pub fn rows(&self) -> impl Iterator<Item = RawRow<'_>> {
        self.items.iter().map(move |values| RawRow {
            fields: &self.fields,
            values,
        })
    }
}

/// One row of a [`RawTable`].
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    fields: &'a [String],
    values: &'a [Value],
}

impl<'a> RawRow<'a> {
    /// Value of a column; `None` when the column is absent or null.
    pub fn get(&self, field: &str) -> Option<&'a Value> {
        let idx = self.fields.iter().position(|f| f == field)?;
        self.values.get(idx).filter(|v| !v.is_null())
    }

    /// Column as trimmed, non-empty text.
    pub fn str(&self, field: &str) -> Option<String> {
        let text = match self.get(field)? {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    /// Column as a float; numeric strings are accepted.
    pub fn f64(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|v: &f64| v.is_finite())
    }

    /// Column as a non-negative integer.
    pub fn u32(&self, field: &str) -> Option<u32> {
        match self.get(field)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// All non-null columns as `(name, text)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&'a str, String)> + 'a {
        let (fields, values) = (self.fields, self.values);
        fields
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| !v.is_null())
            .map(|(f, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (f.as_str(), text)
            })
    }
}

// ============================================================================
// Adapter Contract
// ============================================================================

/// Errors raised by adapters and calendars.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Connection failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// Vendor throttled the request
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Non-zero code in the vendor response body
    #[error("vendor error {code}: {message}")]
    Vendor { code: i64, message: String },

    /// Account lacks the points/permission for this API
    #[error("insufficient vendor credits: {0}")]
    Credits(String),

    /// Request rejected as malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Source does not publish the category
    #[error("{source_id} does not provide {category}")]
    Unsupported { source_id: SourceId, category: Category },

    /// Payload could not be decoded
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Attach the snapshot key and lift into the engine taxonomy.
    pub fn into_hotlist(
        self,
        source_id: SourceId,
        category: Category,
        trade_date: NaiveDate,
    ) -> HotlistError {
        match self {
            Self::InvalidRequest(msg) => HotlistError::InvalidParameters(format!(
                "{} {} {}: {}",
                source_id,
                category,
                crate::calendar::format_trade_date(&trade_date),
                msg
            )),
            Self::Unsupported { .. } => HotlistError::UnsupportedCategory {
                source_id,
                category,
            },
            other => HotlistError::UpstreamUnavailable {
                source_id,
                category,
                trade_date,
                reason: other.to_string(),
            },
        }
    }
}

/// Uniform fetch contract for every upstream source.
///
/// Implementations are stateless and idempotent for a given
/// (source, category, date); retry and timeout policy lives here and
/// nowhere else.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name for logging.
    fn name(&self) -> &'static str;

    /// Fetch one day's raw ranking.
    async fn fetch(
        &self,
        source: SourceId,
        category: Category,
        trade_date: NaiveDate,
        filters: &FetchFilters,
    ) -> Result<RawTable, SourceError>;
}
