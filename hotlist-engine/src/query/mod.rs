//! Query façade.
//!
//! The boundary where parameters are validated, per-source failures are
//! turned into warnings, and results are rendered into a [`Table`]. All
//! validation happens before any upstream call.

pub mod request;
pub mod table;

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::calendar::format_trade_date;
use crate::engine::{self, IntersectionResult, TrajectoryPoint, TrajectoryStep};
use crate::error::{ErrorKind, HotlistError};
use crate::normalize::NormalizedEntity;
use crate::snapshot::{DaySnapshot, Snapshot, SnapshotKey, SnapshotStore};
use crate::source::{Category, SourceId};

pub use request::{DateSpec, HotlistFilters, QueryLimits};
pub use table::Table;

/// Column set of hotlist queries.
pub const HOTLIST_COLUMNS: [&str; 10] = [
    "trade_date",
    "source",
    "category",
    "rank",
    "code",
    "name",
    "canonical_code",
    "metric",
    "strength",
    "flags",
];

/// Fixed leading columns of intersection queries; one column per request
/// follows.
pub const INTERSECTION_COLUMNS: [&str; 4] = ["order", "canonical_code", "name", "best_rank"];

/// Column set of trajectory queries.
pub const TRAJECTORY_COLUMNS: [&str; 5] = ["trade_date", "status", "rank", "strength", "name"];

/// Successful query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub table: Table,
    pub summary: String,
    /// Degraded parts of the answer
    pub warnings: Vec<String>,
}

impl QueryOutput {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Table, summary and warnings as plain text.
    pub fn render(&self) -> String {
        let mut out = self.table.render();
        out.push('\n');
        out.push_str(&self.summary);
        out.push('\n');
        for warning in &self.warnings {
            out.push_str("warning: ");
            out.push_str(warning);
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "columns": self.table.columns,
            "rows": self.table.to_json(),
            "summary": self.summary,
            "warnings": self.warnings,
        })
    }
}

impl fmt::Display for QueryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Failed query.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct QueryFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<HotlistError> for QueryFailure {
    fn from(e: HotlistError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

pub type QueryResult = std::result::Result<QueryOutput, QueryFailure>;

/// Entry point for hotlist, intersection and trajectory queries.
#[derive(Clone)]
pub struct QueryFacade {
    store: SnapshotStore,
    limits: QueryLimits,
}

impl QueryFacade {
    pub fn new(store: SnapshotStore, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Ranked entities per source and trade date.
    ///
    /// A source whose upstream is unavailable becomes a warning; the query
    /// only fails when no source produced anything.
    pub async fn query_hotlist(
        &self,
        sources: &[SourceId],
        category: Category,
        dates: &DateSpec,
        filters: &HotlistFilters,
    ) -> QueryResult {
        let sources = dedup(sources);
        self.validate_sources(&sources, category)?;
        let (start, end) = dates.bounds();
        self.limits.check_range(start, end, self.store.today())?;
        filters.validate()?;

        let mut table = Table::new(HOTLIST_COLUMNS);
        let mut warnings = Vec::new();
        let mut first_failure: Option<HotlistError> = None;
        let mut snapshots = 0usize;

        for source in &sources {
            let days = match dates {
                DateSpec::Single(date) => {
                    match self.store.get_or_fetch(*source, category, *date).await {
                        Ok(snapshot) => vec![DaySnapshot::Data(snapshot)],
                        Err(e) if e.is_degradable() => vec![DaySnapshot::NoData {
                            trade_date: *date,
                            reason: e,
                        }],
                        Err(e) => return Err(e.into()),
                    }
                }
                DateSpec::Range { start, end } => {
                    self.store
                        .get_range(*source, category, *start, *end)?
                        .collect_all()
                        .await
                }
            };

            for day in days {
                match day {
                    DaySnapshot::Data(snapshot) => {
                        snapshots += 1;
                        push_hotlist_rows(&mut table, &snapshot, filters);
                    }
                    DaySnapshot::NoData { reason, .. } if reason.is_rejection() => {
                        return Err(reason.into());
                    }
                    DaySnapshot::NoData { reason, .. } => {
                        warn!(error = %reason, "Hotlist query degraded");
                        warnings.push(reason.to_string());
                        first_failure.get_or_insert(reason);
                    }
                }
            }
        }

        if snapshots == 0 {
            if let Some(e) = first_failure {
                return Err(e.into());
            }
        }

        let summary = format!(
            "{} {} row(s) for {} on {} from {} snapshot(s)",
            table.len(),
            category,
            join_sources(&sources),
            dates,
            snapshots
        );
        info!(rows = table.len(), snapshots, degraded = !warnings.is_empty(), "Hotlist query served");
        Ok(QueryOutput {
            table,
            summary,
            warnings,
        })
    }

    /// Entities present in every `(source, date)` ranking of `category`.
    pub async fn query_intersection(
        &self,
        requests: &[(SourceId, NaiveDate)],
        category: Category,
    ) -> QueryResult {
        if requests.is_empty() {
            return Err(HotlistError::invalid("intersection needs at least one source/date request").into());
        }
        let today = self.store.today();
        for (source, date) in requests {
            source.ensure_supports(category)?;
            self.limits.check_date(*date, today)?;
        }

        let keys: Vec<SnapshotKey> = requests
            .iter()
            .map(|(source, date)| SnapshotKey::new(*source, category, *date))
            .collect();
        let result = engine::intersect(&self.store, &keys).await?;

        Ok(render_intersection(&result, category))
    }

    /// Rank history of one entity.
    pub async fn query_trajectory(
        &self,
        code: &str,
        source: SourceId,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> QueryResult {
        source.ensure_supports(category)?;
        self.limits.check_range(start, end, self.store.today())?;

        let steps = engine::trajectory(&self.store, code, source, category, start, end)?
            .collect_all()
            .await;

        let unavailable: Vec<&TrajectoryStep> = steps
            .iter()
            .filter(|s| matches!(s.point, TrajectoryPoint::Unavailable { .. }))
            .collect();
        if !steps.is_empty() && unavailable.len() == steps.len() {
            return Err(QueryFailure {
                kind: ErrorKind::UpstreamUnavailable,
                message: format!(
                    "{} {} {}-{}: no trading day could be fetched ({})",
                    source,
                    category,
                    format_trade_date(&start),
                    format_trade_date(&end),
                    unavailable_reason(unavailable[0])
                ),
            });
        }

        let warnings = unavailable
            .iter()
            .map(|s| {
                format!(
                    "{}: {}",
                    format_trade_date(&s.trade_date),
                    unavailable_reason(s)
                )
            })
            .collect();

        Ok(render_trajectory(code.trim(), source, category, start, end, &steps, warnings))
    }

    fn validate_sources(&self, sources: &[SourceId], category: Category) -> Result<(), HotlistError> {
        if sources.is_empty() {
            return Err(HotlistError::invalid("at least one source is required"));
        }
        for source in sources {
            source.ensure_supports(category)?;
        }
        Ok(())
    }
}

fn dedup(sources: &[SourceId]) -> Vec<SourceId> {
    let mut out: Vec<SourceId> = Vec::with_capacity(sources.len());
    for source in sources {
        if !out.contains(source) {
            out.push(*source);
        }
    }
    out
}

fn join_sources(sources: &[SourceId]) -> String {
    sources
        .iter()
        .map(SourceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_metric(metric: Option<f64>) -> String {
    metric.map_or_else(|| "-".to_string(), |m| format!("{:.2}", m))
}

fn format_strength(strength: f64) -> String {
    format!("{:.3}", strength)
}

fn format_flags(entity: &NormalizedEntity) -> String {
    entity
        .entity
        .flags
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn push_hotlist_rows(table: &mut Table, snapshot: &Snapshot, filters: &HotlistFilters) {
    let limit = filters.limit.unwrap_or(usize::MAX);
    let trade_date = format_trade_date(&snapshot.key.trade_date);

    for entity in snapshot
        .entities
        .iter()
        .filter(|e| filters.matches(e))
        .take(limit)
    {
        table.push_row(vec![
            trade_date.clone(),
            snapshot.key.source_id.to_string(),
            snapshot.key.category.to_string(),
            entity.entity.rank_position.to_string(),
            entity.entity.entity_code.clone(),
            entity.entity.entity_name.clone(),
            entity.canonical_code.clone(),
            format_metric(entity.entity.rank_metric),
            format_strength(entity.normalized_strength),
            format_flags(entity),
        ]);
    }
}

/// Column label for one intersection request, e.g. `kpl@20240930`.
pub fn request_label(key: &SnapshotKey) -> String {
    format!("{}@{}", key.source_id, format_trade_date(&key.trade_date))
}

fn render_intersection(result: &IntersectionResult, category: Category) -> QueryOutput {
    let mut columns: Vec<String> = INTERSECTION_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(result.requests.iter().map(request_label));
    let mut table = Table::new(columns);

    for (index, member) in result.members.iter().enumerate() {
        let mut row = vec![
            (index + 1).to_string(),
            member.canonical_code.clone(),
            member.display_name.clone(),
            member.best_rank().to_string(),
        ];
        for key in &result.requests {
            let cell = match member.contribution_for(key) {
                Some(c) => format!("{} ({})", c.rank_position, format_strength(c.normalized_strength)),
                None if result.failures.iter().any(|f| f.key == *key) => "n/a".to_string(),
                None => "-".to_string(),
            };
            row.push(cell);
        }
        table.push_row(row);
    }

    let mut summary = format!(
        "{} {} entit{} common to {} of {} request(s)",
        result.members.len(),
        category,
        if result.members.len() == 1 { "y" } else { "ies" },
        result.contributors.len(),
        result.requests.len()
    );
    if result.exhausted_early {
        summary.push_str("; stopped early once the running set was empty");
    }

    let warnings = result
        .failures
        .iter()
        .map(|f| format!("{} left out: {}", request_label(&f.key), f.reason))
        .collect();

    QueryOutput {
        table,
        summary,
        warnings,
    }
}

fn unavailable_reason(step: &TrajectoryStep) -> &str {
    match &step.point {
        TrajectoryPoint::Unavailable { reason } => reason,
        _ => "",
    }
}

fn render_trajectory(
    code: &str,
    source: SourceId,
    category: Category,
    start: NaiveDate,
    end: NaiveDate,
    steps: &[TrajectoryStep],
    warnings: Vec<String>,
) -> QueryOutput {
    let mut table = Table::new(TRAJECTORY_COLUMNS);
    for step in steps {
        let date = format_trade_date(&step.trade_date);
        let row = match &step.point {
            TrajectoryPoint::Ranked {
                rank_position,
                normalized_strength,
                entity_name,
            } => vec![
                date,
                "ranked".to_string(),
                rank_position.to_string(),
                format_strength(*normalized_strength),
                entity_name.clone(),
            ],
            TrajectoryPoint::Absent => vec![date, "absent".to_string()],
            TrajectoryPoint::Unavailable { .. } => vec![date, "unavailable".to_string()],
        };
        table.push_row(row);
    }

    let ranked = steps.iter().filter_map(|s| s.point.rank()).collect::<Vec<_>>();
    let mut summary = format!(
        "{} on {} {} {}-{}: ranked on {} of {} trading day(s)",
        code,
        source,
        category,
        format_trade_date(&start),
        format_trade_date(&end),
        ranked.len(),
        steps.len()
    );
    if let Some(best) = ranked.iter().min() {
        summary.push_str(&format!(", best rank {}", best));
    }

    QueryOutput {
        table,
        summary,
        warnings,
    }
}
