//! Cross-source intersection.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::{HotlistError, Result};
use crate::normalize::{EntityFlag, NormalizedEntity};
use crate::snapshot::{Snapshot, SnapshotKey, SnapshotStore};

/// One request's view of an intersection member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub key: SnapshotKey,
    pub entity_code: String,
    pub entity_name: String,
    pub rank_position: u32,
    pub normalized_strength: f64,
    pub flags: BTreeSet<EntityFlag>,
}

impl Contribution {
    fn from_entity(key: SnapshotKey, entity: &NormalizedEntity) -> Self {
        Self {
            key,
            entity_code: entity.entity.entity_code.clone(),
            entity_name: entity.entity.entity_name.clone(),
            rank_position: entity.entity.rank_position,
            normalized_strength: entity.normalized_strength,
            flags: entity.entity.flags.clone(),
        }
    }
}

/// Entity present in every contributing snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionMember {
    pub canonical_code: String,
    pub display_name: String,
    /// In request order
    pub contributions: Vec<Contribution>,
}

impl IntersectionMember {
    /// Best (lowest) rank across contributors.
    pub fn best_rank(&self) -> u32 {
        self.contributions
            .iter()
            .map(|c| c.rank_position)
            .min()
            .unwrap_or(u32::MAX)
    }

    pub fn rank_sum(&self) -> u64 {
        self.contributions
            .iter()
            .map(|c| u64::from(c.rank_position))
            .sum()
    }

    pub fn contribution_for(&self, key: &SnapshotKey) -> Option<&Contribution> {
        self.contributions.iter().find(|c| c.key == *key)
    }
}

/// A request that could not be fetched and was left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorFailure {
    pub key: SnapshotKey,
    pub reason: String,
}

/// Output of [`intersect`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntersectionResult {
    /// Requests as given
    pub requests: Vec<SnapshotKey>,
    /// Requests whose snapshots were intersected
    pub contributors: Vec<SnapshotKey>,
    /// Ordered by best rank, then rank sum, then canonical code
    pub members: Vec<IntersectionMember>,
    /// Requests skipped after an upstream failure
    pub failures: Vec<ContributorFailure>,
    /// The running set emptied before every request was fetched
    pub exhausted_early: bool,
}

impl IntersectionResult {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Running intersection over canonical codes.
#[derive(Debug, Default)]
struct Accumulator {
    running: Option<BTreeMap<String, IntersectionMember>>,
}

impl Accumulator {
    fn absorb(&mut self, snapshot: &Snapshot) {
        let key = snapshot.key;
        match self.running.as_mut() {
            None => {
                let members = snapshot
                    .entities
                    .iter()
                    .map(|e| {
                        let member = IntersectionMember {
                            canonical_code: e.canonical_code.clone(),
                            display_name: e.entity.entity_name.clone(),
                            contributions: vec![Contribution::from_entity(key, e)],
                        };
                        (e.canonical_code.clone(), member)
                    })
                    .collect();
                self.running = Some(members);
            }
            Some(members) => {
                let incoming: BTreeMap<&str, &NormalizedEntity> = snapshot
                    .entities
                    .iter()
                    .map(|e| (e.canonical_code.as_str(), e))
                    .collect();
                members.retain(|code, member| match incoming.get(code.as_str()) {
                    Some(entity) => {
                        member
                            .contributions
                            .push(Contribution::from_entity(key, entity));
                        true
                    }
                    None => false,
                });
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.running.as_ref().is_some_and(BTreeMap::is_empty)
    }

    fn into_members(self) -> Vec<IntersectionMember> {
        let mut members: Vec<_> = self.running.unwrap_or_default().into_values().collect();
        members.sort_by(|a, b| {
            a.best_rank()
                .cmp(&b.best_rank())
                .then_with(|| a.rank_sum().cmp(&b.rank_sum()))
                .then_with(|| a.canonical_code.cmp(&b.canonical_code))
        });
        members
    }
}

/// Entities present in every requested snapshot.
///
/// Snapshots are fetched lazily in request order and fetching stops as soon
/// as the running set is empty. A request whose upstream is unavailable is
/// recorded in `failures` and left out; if every request fails, the first
/// failure is returned.
pub async fn intersect(
    store: &SnapshotStore,
    requests: &[SnapshotKey],
) -> Result<IntersectionResult> {
    if requests.is_empty() {
        return Err(HotlistError::invalid(
            "intersection needs at least one source/date request",
        ));
    }
    for key in requests {
        key.source_id.ensure_supports(key.category)?;
    }

    let mut acc = Accumulator::default();
    let mut contributors = Vec::new();
    let mut failures: Vec<(SnapshotKey, HotlistError)> = Vec::new();
    let mut exhausted_early = false;

    for (index, key) in requests.iter().enumerate() {
        match store
            .get_or_fetch(key.source_id, key.category, key.trade_date)
            .await
        {
            Ok(snapshot) => {
                acc.absorb(&snapshot);
                contributors.push(*key);
                debug!(key = %key, entities = snapshot.len(), "Absorbed snapshot into intersection");
            }
            Err(e @ HotlistError::UpstreamUnavailable { .. }) => {
                warn!(key = %key, error = %e, "Leaving unavailable source out of intersection");
                failures.push((*key, e));
                continue;
            }
            Err(e) => return Err(e),
        }

        if acc.is_empty() {
            exhausted_early = index + 1 < requests.len();
            break;
        }
    }

    if contributors.is_empty() {
        if let Some((_, first)) = failures.into_iter().next() {
            return Err(first);
        }
        return Err(HotlistError::invalid("no intersection request could be fetched"));
    }

    let members = acc.into_members();
    info!(
        requests = requests.len(),
        contributors = contributors.len(),
        members = members.len(),
        failures = failures.len(),
        exhausted_early,
        "Intersection computed"
    );

    Ok(IntersectionResult {
        requests: requests.to_vec(),
        contributors,
        members,
        failures: failures
            .into_iter()
            .map(|(key, e)| ContributorFailure {
                key,
                reason: e.to_string(),
            })
            .collect(),
        exhausted_early,
    })
}
