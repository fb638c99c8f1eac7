use std::cmp::Ordering;

use crate::model::placement::ApplyStrategy;
use crate::model::work::WorkObjectStatus;
use crate::status::ConditionSet;

/// A binding's lifecycle state. Tagged union, not a class hierarchy:
/// classification is a pure pattern-match on tag + timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BindingState {
    Scheduled,
    Bound,
    Unscheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BindingConditionType {
    RolloutStarted,
    Overridden,
    WorkCreated,
    Applied,
    Available,
    DiffReported,
}

/// The three-dimensional score a `PickN` scoring pass assigns to a cluster. Ordering
/// compares topology-spread, then affinity, then obsolete-placement-affinity, in that
/// order; this is the *only* place cluster precedence by score is decided.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default,
    serde::Serialize, serde::Deserialize,
)]
pub struct ClusterScore {
    pub topology_spread_score: i32,
    pub affinity_score: i32,
    pub obsolete_placement_affinity_score: i32,
}

/// A cluster paired with its optional score, ordered the way the scheduler and rollout
/// controller need clusters ordered everywhere: by score first (`None` sorts lowest, so
/// nil-scored clusters are trimmed first on downscale), ties broken by *reverse* cluster
/// name so the overall sort is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScoredCluster {
    pub cluster_name: String,
    pub score: Option<ClusterScore>,
}

impl PartialOrd for ScoredCluster {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredCluster {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.cluster_name.cmp(&self.cluster_name))
    }
}

/// The scheduler's per-cluster decision record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClusterDecision {
    pub selected: bool,
    pub score: Option<ClusterScore>,
    pub reason: String,
}

impl ClusterDecision {
    pub fn selected(score: Option<ClusterScore>, reason: impl Into<String>) -> Self {
        Self {
            selected: true,
            score,
            reason: reason.into(),
        }
    }

    pub fn unselected(reason: impl Into<String>) -> Self {
        Self {
            selected: false,
            score: None,
            reason: reason.into(),
        }
    }
}

/// Override snapshot references frozen per rollout step.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OverrideRefs {
    pub cluster_scoped: Vec<String>,
    pub namespaced: Vec<String>,
}

/// The scheduler's durable decision for a single target cluster.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Binding {
    pub name: String,
    pub placement_name: String,
    pub target_cluster: String,
    pub policy_snapshot_name: String,
    pub resource_snapshot_name: Option<String>,
    pub cluster_decision: ClusterDecision,
    pub apply_strategy: ApplyStrategy,
    pub override_refs: OverrideRefs,
    pub state: BindingState,
    /// Remembers the pre-`Unscheduled` state; recovered when the cluster is picked again.
    pub previous_state: Option<BindingState>,
    pub conditions: ConditionSet<BindingConditionType>,
    /// Per-manifest statuses reported by the external work applier, rolled up into the
    /// `Applied`/`Available`/`DiffReported` conditions above.
    pub work_statuses: Vec<WorkObjectStatus>,
    pub generation: i64,
    pub deletion_timestamp: Option<jiff::Timestamp>,
    /// Scheduler-owned finalizer preventing premature deletion.
    pub has_scheduler_finalizer: bool,
}

impl Binding {
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The current condition most recent work applier feedback rolled up for the binding's
    /// present generation, or `None` if not yet observed at this generation.
    pub fn condition_at_current_generation(
        &self,
        type_: BindingConditionType,
    ) -> Option<&crate::status::Condition<BindingConditionType>> {
        self.conditions
            .get(&type_)
            .filter(|c| c.observed_at_generation(self.generation))
    }

    /// Whether the binding is failed-to-apply: `Applied=False` or
    /// `DiffReported=False` observed at the binding's current generation. Always a
    /// candidate for update regardless of the availability envelope.
    pub fn is_failed_to_apply(&self) -> bool {
        let applied_false = self
            .condition_at_current_generation(BindingConditionType::Applied)
            .is_some_and(|c| c.status.is_false());
        let diff_false = self
            .condition_at_current_generation(BindingConditionType::DiffReported)
            .is_some_and(|c| c.status.is_false());
        applied_false || diff_false
    }
}

pub fn deterministic_binding_name(placement_name: &str, cluster_name: &str) -> String {
    const MAX_LEN: usize = 253;
    let raw = format!("{placement_name}-{cluster_name}");
    if raw.len() <= MAX_LEN {
        raw
    } else {
        raw.chars().take(MAX_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scored_cluster_orders_by_score_then_reverse_name() {
        let low = ScoredCluster {
            cluster_name: "a".into(),
            score: Some(ClusterScore {
                topology_spread_score: 1,
                affinity_score: 0,
                obsolete_placement_affinity_score: 0,
            }),
        };
        let high = ScoredCluster {
            cluster_name: "b".into(),
            score: Some(ClusterScore {
                topology_spread_score: 2,
                affinity_score: 0,
                obsolete_placement_affinity_score: 0,
            }),
        };
        assert!(high > low);

        let tie_a = ScoredCluster {
            cluster_name: "alpha".into(),
            score: Some(ClusterScore::default()),
        };
        let tie_b = ScoredCluster {
            cluster_name: "beta".into(),
            score: Some(ClusterScore::default()),
        };
        // ties broken by reverse cluster name: lexicographically earlier name sorts higher.
        assert!(tie_a > tie_b);

        let nil = ScoredCluster {
            cluster_name: "z".into(),
            score: None,
        };
        assert!(low > nil, "nil scores trim first (sort lowest)");
    }

    #[test]
    fn binding_name_truncates_to_api_limit() {
        let long_cluster = "c".repeat(300);
        let name = deterministic_binding_name("placement", &long_cluster);
        assert_eq!(name.len(), 253);
    }
}
