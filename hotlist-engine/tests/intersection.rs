//! Intersection and trajectory tests
//!
//! Runs the engine against scripted sources:
//! - Cross-source intersection with rank ordering
//! - Short-circuit once the running set is empty
//! - Degradation when one source is down
//! - Sector identity across platforms
//! - Per-day trajectories over trading days

mod common;

use std::sync::Arc;

use futures::StreamExt;
use hotlist_engine::{
    intersect, trajectory, Category, ErrorKind, HotlistError, SnapshotKey, SourceId,
    TrajectoryPoint,
};

use common::{codes, d, store_at, table, ScriptedAdapter, A, B, C, D, X};

const KPL: SourceId = SourceId::Kpl;
const THS: SourceId = SourceId::Ths;
const EM: SourceId = SourceId::Eastmoney;
const UP: Category = Category::LimitUp;

fn key(source: SourceId, category: Category, day: u32) -> SnapshotKey {
    SnapshotKey::new(source, category, d(2024, 9, day))
}

/// kpl [A, B, C] and ths [B, C, D] on 20240930.
fn two_boards() -> Arc<ScriptedAdapter> {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 9, 30), codes(&[A, B, C]));
    adapter.set(THS, UP, d(2024, 9, 30), codes(&[B, C, D]));
    adapter
}

// ============================================================================
// Intersection
// ============================================================================

#[tokio::test]
async fn test_intersection_across_two_sources() {
    let adapter = two_boards();
    let (store, _clock) = store_at(adapter.clone(), d(2024, 10, 8), &[]);

    let requests = [key(KPL, UP, 30), key(THS, UP, 30)];
    let result = intersect(&store, &requests).await.unwrap();

    let members: Vec<_> = result.members.iter().map(|m| m.canonical_code.as_str()).collect();
    assert_eq!(members, vec![B, C]);
    assert_eq!(result.members[0].best_rank(), 1);
    assert_eq!(result.members[1].best_rank(), 2);
    assert!(!result.is_degraded());
    assert!(!result.exhausted_early);

    // Every member carries one contribution per contributing snapshot
    let b = &result.members[0];
    assert_eq!(b.contributions.len(), 2);
    assert_eq!(b.contribution_for(&requests[0]).unwrap().rank_position, 2);
    assert_eq!(b.contribution_for(&requests[1]).unwrap().rank_position, 1);
}

#[tokio::test]
async fn test_intersection_is_commutative() {
    let adapter = two_boards();
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let forward = intersect(&store, &[key(KPL, UP, 30), key(THS, UP, 30)])
        .await
        .unwrap();
    let backward = intersect(&store, &[key(THS, UP, 30), key(KPL, UP, 30)])
        .await
        .unwrap();

    let canonical = |r: &hotlist_engine::IntersectionResult| {
        r.members
            .iter()
            .map(|m| m.canonical_code.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(canonical(&forward), canonical(&backward));
}

#[tokio::test]
async fn test_single_request_returns_snapshot_in_rank_order() {
    let adapter = two_boards();
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let result = intersect(&store, &[key(THS, UP, 30)]).await.unwrap();
    let members: Vec<_> = result.members.iter().map(|m| m.canonical_code.as_str()).collect();
    assert_eq!(members, vec![B, C, D]);
}

#[tokio::test]
async fn test_same_source_across_dates() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 9, 26), codes(&[A, B]));
    adapter.set(KPL, UP, d(2024, 9, 27), codes(&[C, A]));
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let result = intersect(&store, &[key(KPL, UP, 26), key(KPL, UP, 27)])
        .await
        .unwrap();
    assert_eq!(result.members.len(), 1);
    assert_eq!(result.members[0].canonical_code, A);
    assert_eq!(result.members[0].rank_sum(), 3);
}

#[tokio::test]
async fn test_empty_running_set_stops_fetching() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 9, 30), codes(&[A]));
    adapter.set(THS, UP, d(2024, 9, 30), codes(&[B]));
    adapter.set(KPL, UP, d(2024, 9, 27), codes(&[A, B]));
    let (store, _clock) = store_at(adapter.clone(), d(2024, 10, 8), &[]);

    let requests = [key(KPL, UP, 30), key(THS, UP, 30), key(KPL, UP, 27)];
    let result = intersect(&store, &requests).await.unwrap();

    assert!(result.members.is_empty());
    assert!(result.exhausted_early);
    assert_eq!(adapter.calls(), 2);
    assert_eq!(adapter.calls_for(KPL, UP, d(2024, 9, 27)), 0);
}

#[tokio::test]
async fn test_empty_first_snapshot_stops_after_one_fetch() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 9, 30), codes(&[]));
    adapter.set(THS, UP, d(2024, 9, 30), codes(&[A]));
    let (store, _clock) = store_at(adapter.clone(), d(2024, 10, 8), &[]);

    let result = intersect(&store, &[key(KPL, UP, 30), key(THS, UP, 30)])
        .await
        .unwrap();
    assert!(result.members.is_empty());
    assert!(result.exhausted_early);
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_empty_request_list_rejected() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let err = intersect(&store, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameters);
}

#[tokio::test]
async fn test_unsupported_request_rejected_before_fetching() {
    let adapter = two_boards();
    let (store, _clock) = store_at(adapter.clone(), d(2024, 10, 8), &[]);

    let requests = [key(KPL, UP, 30), key(EM, UP, 30)];
    let err = intersect(&store, &requests).await.unwrap_err();

    assert!(matches!(err, HotlistError::UnsupportedCategory { .. }));
    assert_eq!(adapter.calls(), 0);
}

// ============================================================================
// Degradation
// ============================================================================

#[tokio::test]
async fn test_unavailable_source_degrades_result() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 9, 30), codes(&[A, B, C]));
    adapter.fail(THS, UP, d(2024, 9, 30));
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let result = intersect(&store, &[key(KPL, UP, 30), key(THS, UP, 30)])
        .await
        .unwrap();

    assert!(result.is_degraded());
    assert_eq!(result.contributors, vec![key(KPL, UP, 30)]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].key, key(THS, UP, 30));
    assert!(result.failures[0].reason.contains("ths"));
    assert_eq!(result.members.len(), 3);
}

#[tokio::test]
async fn test_all_sources_unavailable_is_an_error() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.fail(KPL, UP, d(2024, 9, 30));
    adapter.fail(THS, UP, d(2024, 9, 30));
    let (store, _clock) = store_at(adapter.clone(), d(2024, 10, 8), &[]);

    let err = intersect(&store, &[key(KPL, UP, 30), key(THS, UP, 30)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(adapter.calls(), 2);
}

// ============================================================================
// Sector Identity
// ============================================================================

#[tokio::test]
async fn test_sector_names_meet_across_platforms() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(
        KPL,
        Category::Concept,
        d(2024, 9, 30),
        table(&[("000111.KP", "机器人"), ("000222.KP", "人工智能")]),
    );
    adapter.set(
        THS,
        Category::Concept,
        d(2024, 9, 30),
        table(&[("885728.TI", "人工智能概念"), ("885517.TI", "锂电池")]),
    );
    let (store, _clock) = store_at(adapter, d(2024, 10, 8), &[]);

    let result = intersect(
        &store,
        &[key(KPL, Category::Concept, 30), key(THS, Category::Concept, 30)],
    )
    .await
    .unwrap();

    assert_eq!(result.members.len(), 1);
    let member = &result.members[0];
    assert_eq!(member.canonical_code, "SECTOR:人工智能");
    let own_codes: Vec<_> = member
        .contributions
        .iter()
        .map(|c| c.entity_code.as_str())
        .collect();
    assert_eq!(own_codes, vec!["000222.KP", "885728.TI"]);
}

// ============================================================================
// Trajectory
// ============================================================================

#[tokio::test]
async fn test_trajectory_over_trading_days() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.fail(THS, UP, d(2024, 1, 1));
    adapter.set(THS, UP, d(2024, 1, 2), codes(&[A, B, C, D, X]));
    adapter.set(THS, UP, d(2024, 1, 3), codes(&[A, B]));
    adapter.set(THS, UP, d(2024, 1, 5), codes(&[C, D, X]));
    let (store, _clock) = store_at(adapter.clone(), d(2024, 1, 8), &[d(2024, 1, 4)]);

    let mut walk = trajectory(&store, X, THS, UP, d(2024, 1, 1), d(2024, 1, 5)).unwrap();
    let steps = walk.collect_all().await;

    let dates: Vec<_> = steps.iter().map(|s| s.trade_date).collect();
    assert_eq!(
        dates,
        vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 5)]
    );
    assert!(matches!(steps[0].point, TrajectoryPoint::Unavailable { .. }));
    assert_eq!(steps[1].point.rank(), Some(5));
    assert_eq!(steps[2].point, TrajectoryPoint::Absent);
    assert_eq!(steps[3].point.rank(), Some(3));
    assert_eq!(adapter.calls_for(THS, UP, d(2024, 1, 4)), 0);
}

#[tokio::test]
async fn test_trajectory_restart_and_stream() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.set(KPL, UP, d(2024, 1, 2), codes(&[X]));
    adapter.set(KPL, UP, d(2024, 1, 3), codes(&[A, X]));
    let (store, _clock) = store_at(adapter.clone(), d(2024, 1, 8), &[]);

    let mut walk = trajectory(&store, "600999.sh", KPL, UP, d(2024, 1, 2), d(2024, 1, 3)).unwrap();
    let first = walk.next_step().await.unwrap();
    assert_eq!(first.point.rank(), Some(1));

    walk.restart();
    let ranks: Vec<_> = walk
        .into_stream()
        .map(|step| step.point.rank())
        .collect()
        .await;
    assert_eq!(ranks, vec![Some(1), Some(2)]);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_trajectory_rejects_bad_input() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let (store, _clock) = store_at(adapter.clone(), d(2024, 1, 8), &[]);

    assert!(trajectory(&store, "  ", KPL, UP, d(2024, 1, 2), d(2024, 1, 3)).is_err());
    assert!(trajectory(&store, X, KPL, UP, d(2024, 1, 3), d(2024, 1, 2)).is_err());
    let err = trajectory(&store, X, EM, UP, d(2024, 1, 2), d(2024, 1, 3))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::UnsupportedCategory);
    assert_eq!(adapter.calls(), 0);
}
