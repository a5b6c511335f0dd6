//! Intersection and trend analysis over stored snapshots.
//!
//! Both operations read through the [`SnapshotStore`](crate::snapshot::SnapshotStore)
//! and fetch lazily: intersections stop at the first empty running set and
//! trajectories only fetch the days a caller advances to.

pub mod intersect;
pub mod trajectory;

pub use intersect::{
    intersect, Contribution, ContributorFailure, IntersectionMember, IntersectionResult,
};
pub use trajectory::{trajectory, Trajectory, TrajectoryPoint, TrajectoryStep};
