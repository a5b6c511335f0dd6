//! Error taxonomy for the hotlist engine.
//!
//! Every failure that reaches a caller is one of these kinds, and every
//! message names the source, category and trade date it concerns.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::format_trade_date;
use crate::source::{Category, SourceId};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, HotlistError>;

/// Engine error.
///
/// `Clone` so a single upstream failure can be handed to every caller
/// waiting on the same coalesced fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HotlistError {
    /// Bad date format, unknown enum value, empty source list, non-trading date
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The source has no ranking for this category
    #[error("{source_id} does not provide the {category} ranking")]
    UnsupportedCategory { source_id: SourceId, category: Category },

    /// Network, timeout or vendor failure after adapter retries
    #[error("{source_id} {category} {}: upstream unavailable ({reason})", format_trade_date(.trade_date))]
    UpstreamUnavailable {
        source_id: SourceId,
        category: Category,
        trade_date: NaiveDate,
        reason: String,
    },

    /// Duplicate key or ambiguous canonical identity inside one snapshot
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Snapshot database failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse classification used at the query boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameters,
    UnsupportedCategory,
    UpstreamUnavailable,
    DataIntegrity,
    Storage,
}

impl HotlistError {
    /// Shorthand for an `InvalidParameters` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Get the kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Self::UnsupportedCategory { .. } => ErrorKind::UnsupportedCategory,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the failure is rejected before any I/O happens.
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameters(_) | Self::UnsupportedCategory { .. }
        )
    }

    /// Whether a multi-source query may degrade around this failure
    /// instead of failing as a whole.
    pub const fn is_degradable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. } | Self::Storage(_))
    }
}

impl From<rusqlite::Error> for HotlistError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for HotlistError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("snapshot encoding: {}", e))
    }
}
