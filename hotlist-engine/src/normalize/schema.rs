//! Per-source field mapping.
//!
//! Each platform names its columns differently and measures "strength" with
//! a different metric. One [`SourceSchema`] per source captures those choices;
//! [`SourceId::schema`] selects it, so adding a platform means adding one
//! strategy here rather than branching through the normalizer.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use super::{EntityFlag, RankedEntity};
use crate::error::HotlistError;
use crate::source::{Category, RawRow, SourceId};

/// Field mapping strategy for one source.
pub trait SourceSchema: Send + Sync {
    /// Source this schema maps.
    fn source(&self) -> SourceId;

    /// Column carrying the entity code.
    fn code_field(&self) -> &'static str {
        "ts_code"
    }

    /// Columns carrying the display name, in preference order.
    fn name_fields(&self) -> &'static [&'static str] {
        &["name", "ts_name"]
    }

    /// Column carrying an explicit rank; `None` means row order is the rank.
    fn rank_field(&self, category: Category) -> Option<&'static str>;

    /// Column carrying the strength metric.
    fn metric_field(&self, category: Category) -> Option<&'static str>;

    /// Categorical flags carried by a row.
    fn row_flags(&self, row: &RawRow<'_>) -> BTreeSet<EntityFlag>;

    /// Map one row (at 0-based `index`) onto a [`RankedEntity`].
    fn map_row(
        &self,
        category: Category,
        trade_date: NaiveDate,
        index: usize,
        row: &RawRow<'_>,
    ) -> Result<RankedEntity, HotlistError> {
        let source_id = self.source();
        let name = self.name_fields().iter().find_map(|f| row.str(f));
        let code = row.str(self.code_field());

        let (entity_code, entity_name) = match (code, name) {
            (Some(code), Some(name)) => (code, name),
            (Some(code), None) => (code.clone(), code),
            (None, Some(name)) if category.is_sector() => (name.clone(), name),
            _ => {
                return Err(HotlistError::DataIntegrity(format!(
                    "{} {} row {} has no usable code or name",
                    source_id,
                    category,
                    index + 1
                )))
            }
        };

        let rank_field = self.rank_field(category);
        let rank_position = rank_field
            .and_then(|f| row.u32(f))
            .filter(|r| *r > 0)
            .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX));

        let metric_field = self.metric_field(category);
        let rank_metric = metric_field.and_then(|f| row.f64(f));

        let mut flags = self.row_flags(row);
        if let Some(flag) = EntityFlag::implied_by(category) {
            flags.insert(flag);
        }

        let consumed: [Option<&str>; 4] = [
            Some(self.code_field()),
            rank_field,
            metric_field,
            Some("trade_date"),
        ];
        let extra: BTreeMap<String, String> = row
            .pairs()
            .filter(|(field, _)| !consumed.contains(&Some(*field)))
            .filter(|(field, _)| !self.name_fields().contains(field))
            .map(|(field, value)| (field.to_string(), value))
            .collect();

        Ok(RankedEntity {
            entity_code,
            entity_name,
            source_id,
            category,
            rank_position,
            rank_metric,
            trade_date,
            flags,
            extra,
        })
    }
}

/// Flag for a limit-board label as the platforms spell it.
fn flag_from_label(label: &str) -> Option<EntityFlag> {
    if label.contains("炸板") {
        Some(EntityFlag::Exploded)
    } else if label.contains("跌停") {
        Some(EntityFlag::LimitDown)
    } else if label.contains("涨停") || label.contains("连板") {
        Some(EntityFlag::LimitUp)
    } else {
        None
    }
}

/// 开盘啦: `kpl_list` boards (tagged rows) and the `kpl_concept` library.
#[derive(Debug, Clone, Copy, Default)]
pub struct KplSchema;

impl SourceSchema for KplSchema {
    fn source(&self) -> SourceId {
        SourceId::Kpl
    }

    fn rank_field(&self, _category: Category) -> Option<&'static str> {
        None
    }

    fn metric_field(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::Concept => Some("z_t_num"),
            Category::LimitUp | Category::LimitDown => Some("limit_order"),
            Category::Exploded => Some("pct_chg"),
            Category::Auction => Some("bid_amount"),
            Category::HotStock => None,
        }
    }

    fn row_flags(&self, row: &RawRow<'_>) -> BTreeSet<EntityFlag> {
        row.str("tag")
            .and_then(|tag| flag_from_label(&tag))
            .into_iter()
            .collect()
    }
}

/// 同花顺: `ths_hot` lists (explicit rank) and `limit_list_ths` pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThsSchema;

impl SourceSchema for ThsSchema {
    fn source(&self) -> SourceId {
        SourceId::Ths
    }

    fn rank_field(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::HotStock | Category::Concept => Some("rank"),
            _ => None,
        }
    }

    fn metric_field(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::HotStock | Category::Concept => Some("hot"),
            Category::LimitUp | Category::LimitDown => Some("limit_order"),
            Category::Exploded => Some("pct_chg"),
            Category::Auction => None,
        }
    }

    fn row_flags(&self, row: &RawRow<'_>) -> BTreeSet<EntityFlag> {
        row.str("limit_type")
            .and_then(|t| flag_from_label(&t))
            .into_iter()
            .collect()
    }
}

/// 东方财富: `dc_hot` popularity list and `dc_index` concept boards.
#[derive(Debug, Clone, Copy, Default)]
pub struct EastmoneySchema;

impl SourceSchema for EastmoneySchema {
    fn source(&self) -> SourceId {
        SourceId::Eastmoney
    }

    fn rank_field(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::HotStock => Some("rank"),
            _ => None,
        }
    }

    fn metric_field(&self, category: Category) -> Option<&'static str> {
        match category {
            Category::HotStock => Some("hot"),
            Category::Concept => Some("pct_change"),
            _ => None,
        }
    }

    fn row_flags(&self, _row: &RawRow<'_>) -> BTreeSet<EntityFlag> {
        BTreeSet::new()
    }
}

static KPL_SCHEMA: KplSchema = KplSchema;
static THS_SCHEMA: ThsSchema = ThsSchema;
static EASTMONEY_SCHEMA: EastmoneySchema = EastmoneySchema;

impl SourceId {
    /// Field mapping strategy for this source.
    pub fn schema(&self) -> &'static dyn SourceSchema {
        match self {
            Self::Kpl => &KPL_SCHEMA,
            Self::Ths => &THS_SCHEMA,
            Self::Eastmoney => &EASTMONEY_SCHEMA,
        }
    }
}
