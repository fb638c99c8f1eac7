use crate::model::cluster::Toleration;
use crate::status::ConditionSet;

/// A requirement that a cluster's labels/properties must satisfy to be selected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicyAffinity {
    /// Required-during-scheduling terms: a cluster failing any of these is filtered out.
    pub required: Vec<AffinityTerm>,
    /// Preferred-during-scheduling terms: each matched term adds to the affinity score but
    /// does not filter.
    pub preferred: Vec<WeightedAffinityTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AffinityTerm {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WeightedAffinityTerm {
    pub term: AffinityTerm,
    pub weight: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WhenUnsatisfiable {
    DoNotSchedule,
    ScheduleAnyway,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TopologySpreadConstraint {
    pub topology_key: String,
    pub max_skew: u32,
    pub when_unsatisfiable: WhenUnsatisfiable,
}

/// Policy variant tag. `External` carries no scheduling output: it signals
/// that a staged update runner drives rollout instead of the scheduler/rollout controller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Policy {
    PickAll {
        affinity: PolicyAffinity,
    },
    PickN {
        desired_count: u32,
        affinity: PolicyAffinity,
        topology_spread_constraints: Vec<TopologySpreadConstraint>,
        tolerations: Vec<Toleration>,
    },
    PickFixed {
        cluster_names: Vec<String>,
    },
    External,
}

impl Policy {
    pub fn type_name(&self) -> &'static str {
        match self {
            Policy::PickAll { .. } => "PickAll",
            Policy::PickN { .. } => "PickN",
            Policy::PickFixed { .. } => "PickFixed",
            Policy::External => "External",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolicyConditionType {
    Scheduled,
}

/// Immutable freeze of a Placement's policy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicySnapshot {
    pub name: String,
    pub placement_name: String,
    pub policy: Policy,
    /// Monotonic per Placement.
    pub policy_index: u64,
    pub is_latest: bool,
    /// For PickN: the `numberOfClusters` annotation. For PickFixed: the list length.
    /// For PickAll: `-1` until the first scheduling cycle fills it in.
    pub observed_cluster_count: i64,
    pub generation: i64,
    pub conditions: ConditionSet<PolicyConditionType>,
}

impl PolicySnapshot {
    pub fn desired_count_for_pick_n(&self) -> Option<u32> {
        match &self.policy {
            Policy::PickN { desired_count, .. } => Some(*desired_count),
            _ => None,
        }
    }
}
