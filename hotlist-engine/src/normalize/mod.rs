//! Ranking normalizer.
//!
//! Turns a vendor [`RawTable`] into rank-ordered [`NormalizedEntity`] values:
//! per-source field mapping ([`schema`]), cross-source identity
//! ([`canonical`]) and comparable strength ([`strength`]). Pure; no I/O.

pub mod canonical;
pub mod schema;
pub mod strength;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::error::HotlistError;
use crate::source::{Category, RawTable, SourceId};

pub use canonical::CanonicalResolver;
pub use schema::SourceSchema;
use strength::StrengthInput;

/// Categorical marker carried by an entity. Never folded into strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityFlag {
    LimitUp,
    LimitDown,
    Exploded,
}

impl EntityFlag {
    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LimitUp => "limit-up",
            Self::LimitDown => "limit-down",
            Self::Exploded => "exploded",
        }
    }

    /// Flag every entity of a category carries.
    pub const fn implied_by(category: Category) -> Option<Self> {
        match category {
            Category::LimitUp => Some(Self::LimitUp),
            Category::LimitDown => Some(Self::LimitDown),
            Category::Exploded => Some(Self::Exploded),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityFlag {
    type Err = HotlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "limit-up" => Ok(Self::LimitUp),
            "limit-down" => Ok(Self::LimitDown),
            "exploded" => Ok(Self::Exploded),
            other => Err(HotlistError::invalid(format!(
                "unknown flag '{}' (expected limit-up, limit-down or exploded)",
                other
            ))),
        }
    }
}

/// One entity as a source ranked it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity_code: String,
    pub entity_name: String,
    pub source_id: SourceId,
    pub category: Category,
    /// 1-based
    pub rank_position: u32,
    pub rank_metric: Option<f64>,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub flags: BTreeSet<EntityFlag>,
    /// Unmapped vendor fields, for debugging
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A ranked entity with cross-source identity and strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    #[serde(flatten)]
    pub entity: RankedEntity,
    pub canonical_code: String,
    /// In `[0, 1]`, top of the list is 1.0
    pub normalized_strength: f64,
}

impl NormalizedEntity {
    pub fn has_flag(&self, flag: EntityFlag) -> bool {
        self.entity.flags.contains(&flag)
    }
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Ordered by rank ascending
    pub entities: Vec<NormalizedEntity>,
    /// Rows dropped for integrity problems
    pub dropped: usize,
}

/// Maps raw payloads to normalized entities.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    resolver: CanonicalResolver,
}

impl Normalizer {
    pub fn new(resolver: CanonicalResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &CanonicalResolver {
        &self.resolver
    }

    /// Normalize one source/category/date payload.
    pub fn normalize(
        &self,
        source: SourceId,
        category: Category,
        trade_date: NaiveDate,
        table: &RawTable,
    ) -> NormalizedBatch {
        let schema = source.schema();
        let mut dropped = 0;

        let mut ranked: Vec<RankedEntity> = Vec::with_capacity(table.len());
        for (index, row) in table.rows().enumerate() {
            match schema.map_row(category, trade_date, index, &row) {
                Ok(entity) => ranked.push(entity),
                Err(e) => {
                    warn!(%source, %category, error = %e, "Dropping unmappable row");
                    dropped += 1;
                }
            }
        }

        // Stable: equal ranks keep vendor order
        ranked.sort_by_key(|e| e.rank_position);

        let mut seen_codes = HashSet::new();
        let mut seen_canonical = HashSet::new();
        let mut kept: Vec<(RankedEntity, String)> = Vec::with_capacity(ranked.len());
        for entity in ranked {
            if !seen_codes.insert(entity.entity_code.clone()) {
                let e = HotlistError::DataIntegrity(format!(
                    "duplicate entity {} in {} {} snapshot",
                    entity.entity_code, source, category
                ));
                warn!(error = %e, rank = entity.rank_position, "Dropping duplicate entity");
                dropped += 1;
                continue;
            }

            let canonical = self.resolver.resolve(
                source,
                category,
                &entity.entity_code,
                &entity.entity_name,
            );
            if !seen_canonical.insert(canonical.clone()) {
                let e = HotlistError::DataIntegrity(format!(
                    "{} ({}) collides with an earlier entity as {} in {} {}",
                    entity.entity_name, entity.entity_code, canonical, source, category
                ));
                warn!(error = %e, "Dropping ambiguous entity");
                dropped += 1;
                continue;
            }
            kept.push((entity, canonical));
        }

        let inputs: Vec<StrengthInput> = kept
            .iter()
            .map(|(e, _)| StrengthInput {
                rank_position: e.rank_position,
                rank_metric: e.rank_metric,
            })
            .collect();
        let (scores, basis) = strength::assign(&inputs);
        debug!(
            %source,
            %category,
            rows = table.len(),
            kept = kept.len(),
            dropped,
            ?basis,
            "Normalized ranking"
        );

        let entities = kept
            .into_iter()
            .zip(scores)
            .map(|((entity, canonical_code), normalized_strength)| NormalizedEntity {
                entity,
                canonical_code,
                normalized_strength,
            })
            .collect();

        NormalizedBatch { entities, dropped }
    }
}
