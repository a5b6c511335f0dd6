//! Query parameters and up-front validation.

use chrono::NaiveDate;
use hotlist_common::StoreConfig;
use std::fmt;
use std::str::FromStr;

use crate::calendar::{format_trade_date, parse_trade_date};
use crate::error::{HotlistError, Result};
use crate::normalize::{EntityFlag, NormalizedEntity};

/// A single trade date or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Single(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateSpec {
    /// Parse `YYYYMMDD`, `YYYYMMDD-YYYYMMDD` or `YYYYMMDD..YYYYMMDD`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.split_once("..").or_else(|| s.split_once('-'));
        match split {
            Some((start, end)) => Ok(Self::Range {
                start: parse_trade_date(start)?,
                end: parse_trade_date(end)?,
            }),
            None => Ok(Self::Single(parse_trade_date(s)?)),
        }
    }

    /// Inclusive bounds.
    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            Self::Single(date) => (date, date),
            Self::Range { start, end } => (start, end),
        }
    }
}

impl FromStr for DateSpec {
    type Err = HotlistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(date) => f.write_str(&format_trade_date(date)),
            Self::Range { start, end } => write!(
                f,
                "{}-{}",
                format_trade_date(start),
                format_trade_date(end)
            ),
        }
    }
}

/// Row filters for hotlist queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HotlistFilters {
    /// Top-N per snapshot, applied after the other filters
    pub limit: Option<usize>,
    /// Case-insensitive substring of the name or code
    pub name_contains: Option<String>,
    pub min_strength: Option<f64>,
    pub flag: Option<EntityFlag>,
}

impl HotlistFilters {
    pub fn matches(&self, entity: &NormalizedEntity) -> bool {
        if let Some(needle) = self.name_contains.as_deref().map(str::trim) {
            let needle = needle.to_lowercase();
            let name = entity.entity.entity_name.to_lowercase();
            let code = entity.entity.entity_code.to_lowercase();
            if !needle.is_empty() && !name.contains(&needle) && !code.contains(&needle) {
                return false;
            }
        }
        if let Some(min) = self.min_strength {
            if entity.normalized_strength < min {
                return false;
            }
        }
        if let Some(flag) = self.flag {
            if !entity.has_flag(flag) {
                return false;
            }
        }
        true
    }

    /// Reject filters that can never match.
    pub fn validate(&self) -> Result<()> {
        if self.limit == Some(0) {
            return Err(HotlistError::invalid("limit must be at least 1"));
        }
        if let Some(min) = self.min_strength {
            if !(0.0..=1.0).contains(&min) {
                return Err(HotlistError::invalid(format!(
                    "min strength must be within [0, 1], got {}",
                    min
                )));
            }
        }
        Ok(())
    }
}

/// Date bounds enforced on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// How far back a trade date may be
    pub retention_days: u32,
    /// Longest accepted range, in calendar days
    pub max_range_days: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for QueryLimits {
    fn from(config: &StoreConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            max_range_days: config.max_range_days,
        }
    }
}

impl QueryLimits {
    /// Reject a date in the future or outside the retention window.
    pub fn check_date(&self, date: NaiveDate, today: NaiveDate) -> Result<()> {
        if date > today {
            return Err(HotlistError::invalid(format!(
                "trade date {} is in the future (today is {})",
                format_trade_date(&date),
                format_trade_date(&today)
            )));
        }
        if (today - date).num_days() > i64::from(self.retention_days) {
            return Err(HotlistError::invalid(format!(
                "trade date {} is older than the {}-day retention window",
                format_trade_date(&date),
                self.retention_days
            )));
        }
        Ok(())
    }

    /// Reject an inverted, out-of-window or overlong range.
    pub fn check_range(&self, start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<()> {
        if start > end {
            return Err(HotlistError::invalid(format!(
                "range start {} is after end {}",
                format_trade_date(&start),
                format_trade_date(&end)
            )));
        }
        self.check_date(start, today)?;
        self.check_date(end, today)?;

        let span = (end - start).num_days() + 1;
        if span > i64::from(self.max_range_days) {
            return Err(HotlistError::invalid(format!(
                "range {}-{} spans {} days; at most {} are allowed",
                format_trade_date(&start),
                format_trade_date(&end),
                span,
                self.max_range_days
            )));
        }
        Ok(())
    }
}
