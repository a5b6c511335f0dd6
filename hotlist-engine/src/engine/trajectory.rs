//! One entity's rank over a date range.

use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde::Serialize;

use crate::error::{HotlistError, Result};
use crate::normalize::canonical::{security_code, SECTOR_PREFIX};
use crate::normalize::{CanonicalResolver, NormalizedEntity};
use crate::snapshot::{DaySnapshot, SnapshotRange, SnapshotStore};
use crate::source::{Category, SourceId};

/// Where the entity stood on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrajectoryPoint {
    Ranked {
        rank_position: u32,
        normalized_strength: f64,
        entity_name: String,
    },
    /// The day has a snapshot and the entity is not in it
    Absent,
    /// No snapshot could be produced for the day
    Unavailable { reason: String },
}

impl TrajectoryPoint {
    pub fn rank(&self) -> Option<u32> {
        match self {
            Self::Ranked { rank_position, .. } => Some(*rank_position),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryStep {
    pub trade_date: NaiveDate,
    #[serde(flatten)]
    pub point: TrajectoryPoint,
}

/// Accepted spellings of the tracked entity.
#[derive(Debug, Clone)]
struct Target {
    input: String,
    sector: Option<String>,
}

impl Target {
    fn new(code: &str, category: Category, resolver: &CanonicalResolver) -> Self {
        let input = code.trim().to_string();
        let sector = if category.is_sector() && security_code(&input).is_none() {
            let name = input
                .get(..SECTOR_PREFIX.len())
                .filter(|p| p.eq_ignore_ascii_case(SECTOR_PREFIX))
                .map_or(input.as_str(), |_| &input[SECTOR_PREFIX.len()..]);
            resolver
                .sector_key(name)
                .map(|key| format!("{}{}", SECTOR_PREFIX, key))
        } else {
            None
        };
        Self { input, sector }
    }

    fn matches(&self, entity: &NormalizedEntity) -> bool {
        entity.canonical_code.eq_ignore_ascii_case(&self.input)
            || entity.entity.entity_code.eq_ignore_ascii_case(&self.input)
            || self
                .sector
                .as_deref()
                .is_some_and(|s| entity.canonical_code == s)
    }
}

/// Lazy per-day trajectory; see [`trajectory`].
pub struct Trajectory {
    range: SnapshotRange,
    target: Target,
}

impl Trajectory {
    /// Next trading day's point.
    pub async fn next_step(&mut self) -> Option<TrajectoryStep> {
        let day = self.range.next_day().await?;
        let trade_date = day.trade_date();
        let point = match day {
            DaySnapshot::Data(snapshot) => snapshot
                .entities
                .iter()
                .find(|e| self.target.matches(e))
                .map_or(TrajectoryPoint::Absent, |e| TrajectoryPoint::Ranked {
                    rank_position: e.entity.rank_position,
                    normalized_strength: e.normalized_strength,
                    entity_name: e.entity.entity_name.clone(),
                }),
            DaySnapshot::NoData { reason, .. } => TrajectoryPoint::Unavailable {
                reason: reason.to_string(),
            },
        };
        Some(TrajectoryStep { trade_date, point })
    }

    pub fn restart(&mut self) {
        self.range.restart();
    }

    pub async fn collect_all(&mut self) -> Vec<TrajectoryStep> {
        let mut steps = Vec::new();
        while let Some(step) = self.next_step().await {
            steps.push(step);
        }
        steps
    }

    pub fn into_stream(self) -> impl Stream<Item = TrajectoryStep> {
        stream::unfold(self, |mut t| async move {
            let step = t.next_step().await?;
            Some((step, t))
        })
    }
}

/// Track `code` through `[start, end]` for one source and category.
///
/// `code` may be a canonical code (any case), the source's own entity code,
/// or for sectors a name that canonicalizes to the sector. Non-trading days
/// are omitted from the sequence.
pub fn trajectory(
    store: &SnapshotStore,
    code: &str,
    source: SourceId,
    category: Category,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Trajectory> {
    if code.trim().is_empty() {
        return Err(HotlistError::invalid("trajectory needs an entity code"));
    }
    let range = store.get_range(source, category, start, end)?;
    let target = Target::new(code, category, store.normalizer().resolver());
    Ok(Trajectory { range, target })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use crate::source::RawTable;
    use serde_json::json;

    fn entity(source: SourceId, category: Category, code: &str, name: &str) -> NormalizedEntity {
        let table = RawTable::new(&["ts_code", "name"]).with_row(vec![json!(code), json!(name)]);
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        Normalizer::default()
            .normalize(source, category, date, &table)
            .entities
            .remove(0)
    }

    #[test]
    fn test_target_matches_security_forms() {
        let resolver = CanonicalResolver::new();
        let e = entity(SourceId::Ths, Category::HotStock, "600001.SH", "甲");
        assert!(Target::new("600001.sh", Category::HotStock, &resolver).matches(&e));
        assert!(!Target::new("600002.SH", Category::HotStock, &resolver).matches(&e));

        let scoped = entity(SourceId::Ths, Category::HotStock, "HK00700", "腾讯");
        assert!(Target::new("ths:hk00700", Category::HotStock, &resolver).matches(&scoped));
        assert!(Target::new("HK00700", Category::HotStock, &resolver).matches(&scoped));
    }

    #[test]
    fn test_target_matches_sector_names() {
        let resolver = CanonicalResolver::new();
        let e = entity(SourceId::Eastmoney, Category::Concept, "BK0800", "人工智能板块");
        assert!(Target::new("人工智能概念", Category::Concept, &resolver).matches(&e));
        assert!(Target::new("sector:人工智能", Category::Concept, &resolver).matches(&e));
        assert!(Target::new("BK0800", Category::Concept, &resolver).matches(&e));
        assert!(!Target::new("机器人", Category::Concept, &resolver).matches(&e));
    }

    #[test]
    fn test_point_serializes_with_status() {
        let step = TrajectoryStep {
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            point: TrajectoryPoint::Absent,
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["status"], "absent");
        assert_eq!(value["trade_date"], "2024-01-03");
    }
}
