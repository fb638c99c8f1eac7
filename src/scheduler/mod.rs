//! Converts a Placement's latest policy snapshot plus the member cluster inventory into an
//! ordered, deduplicated set of bindings.
//!
//! [`plan`] is the pure core: given the classified bindings, the inventory, and an
//! eligibility checker, it returns the create/patch operations and the decision array the
//! caller persists. [`reconcile`] is the thin async wrapper that fetches inputs from a
//! [`crate::store::Store`] and applies the plan.

mod cross_reference;
mod pick;

pub use cross_reference::BindingOp;
pub use pick::{pick_all, pick_fixed, pick_n, ClusterPick, PickNInputs};

use std::collections::HashSet;

use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::classify::classify_bindings;
use crate::clock::Clock;
use crate::error::{ErrorClass, ErrorClassify};
use crate::label_selector::LabelSelector;
use crate::model::{
    Binding, ClusterDecision, EligibilityChecker, MemberCluster, Policy, PolicyConditionType,
    PolicySnapshot,
};
use crate::status::{Condition, ConditionStatus};
use crate::store::{Store, StoreError};

/// The maximum number of cluster decisions recorded on a policy snapshot's status, mirroring
/// the API-imposed cap named in the scheduling pipeline.
pub const MAX_DECISIONS: usize = 256;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "binding for cluster {cluster_name:?} is Unscheduled but carries no previous-state record"
    ))]
    MissingPreviousState { cluster_name: String },

    #[snafu(display("store operation failed"))]
    Store { source: StoreError },
}

impl ErrorClassify for Error {
    fn class(&self) -> ErrorClass {
        match self {
            Error::MissingPreviousState { .. } => ErrorClass::UnexpectedBehavior,
            Error::Store { source } => source.class(),
        }
    }
}

/// The outcome of one scheduling cycle for a single Placement.
pub struct SchedulingOutcome {
    pub ops: Vec<BindingOp>,
    pub scheduled_condition: Condition<PolicyConditionType>,
    pub decisions: Vec<(String, ClusterDecision)>,
    /// Set when a plugin-imposed batch limit was hit before `desired_count` was reached:
    /// the caller should requeue for another scheduling cycle rather than wait for an
    /// external trigger.
    pub requeue: bool,
}

fn fully_scheduled(policy: &Policy, selected_count: usize) -> bool {
    match policy {
        Policy::PickAll { .. } | Policy::External => true,
        Policy::PickFixed { cluster_names } => selected_count == cluster_names.len(),
        Policy::PickN { desired_count, .. } => selected_count as u32 == *desired_count,
    }
}

/// The pure scheduling core: classifies `existing_bindings`, runs the policy-specific
/// pick pipeline, cross-references picks against bindings, and (for PickN) downscales.
/// Deterministic for fixed inputs, per the replayability requirement.
#[instrument(skip_all, fields(placement = %policy_snapshot.placement_name, policy_snapshot = %policy_snapshot.name))]
pub fn plan(
    policy_snapshot: &PolicySnapshot,
    existing_bindings: &[Binding],
    clusters: &[MemberCluster],
    eligibility: &dyn EligibilityChecker,
    clock: &dyn Clock,
    batch_limit: Option<u32>,
) -> Result<SchedulingOutcome, Error> {
    let now = clock.now();
    let classified = classify_bindings(existing_bindings, clusters, &policy_snapshot.name);

    let already_satisfied: HashSet<String> = classified
        .steady_state()
        .map(|b| b.target_cluster.clone())
        .collect();
    let existing_steady_state: Vec<MemberCluster> = clusters
        .iter()
        .filter(|c| already_satisfied.contains(&c.name))
        .cloned()
        .collect();

    let picks = match &policy_snapshot.policy {
        Policy::PickAll { affinity } => pick::pick_all(clusters, eligibility, affinity),
        Policy::PickFixed { cluster_names } => {
            pick::pick_fixed(cluster_names, clusters, eligibility)
        }
        Policy::PickN {
            desired_count,
            affinity,
            topology_spread_constraints,
            tolerations,
        } => {
            let inputs = PickNInputs {
                desired_count: *desired_count,
                affinity,
                topology_spread_constraints,
                tolerations,
                already_satisfied: &already_satisfied,
                existing_steady_state: &existing_steady_state,
                batch_limit,
            };
            pick::pick_n(clusters, eligibility, &inputs)
        }
        Policy::External => Vec::new(),
    };

    let selected: Vec<ClusterPick> = picks.iter().filter(|p| p.decision.selected).cloned().collect();
    let mut ops = cross_reference::cross_reference(
        &policy_snapshot.placement_name,
        &policy_snapshot.name,
        policy_snapshot.generation,
        &classified,
        &selected,
        now,
    )?;

    let mut requeue = false;
    if let Policy::PickN { desired_count, .. } = &policy_snapshot.policy {
        let currently_satisfied = already_satisfied.len() + selected.len();
        if currently_satisfied as u32 > *desired_count {
            ops.extend(cross_reference::downscale(
                classified.steady_state(),
                classified.obsolete.iter().copied(),
                *desired_count,
            ));
        } else if let Some(limit) = batch_limit {
            requeue =
                selected.len() as u32 == limit && (currently_satisfied as u32) < *desired_count;
        }
    }

    let selected_count = already_satisfied.len() + selected.len();
    let scheduled = fully_scheduled(&policy_snapshot.policy, selected_count);
    let message = if scheduled {
        "fully scheduled".to_string()
    } else {
        let total = match &policy_snapshot.policy {
            Policy::PickN { desired_count, .. } => *desired_count as usize,
            Policy::PickFixed { cluster_names } => cluster_names.len(),
            _ => selected_count,
        };
        format!("not fully scheduled ({selected_count}/{total})")
    };
    let scheduled_condition = Condition::new(
        PolicyConditionType::Scheduled,
        ConditionStatus::from_bool(scheduled),
    )
    .with_message(message)
    .with_observed_generation(policy_snapshot.generation)
    .with_transition_time(now);

    let mut decisions: Vec<(String, ClusterDecision)> = picks
        .into_iter()
        .map(|p| (p.cluster_name, p.decision))
        .collect();
    decisions.truncate(MAX_DECISIONS);

    Ok(SchedulingOutcome {
        ops,
        scheduled_condition,
        decisions,
        requeue,
    })
}

/// Fetches a Placement's latest policy snapshot's inputs from the stores, computes the
/// plan, and persists it: binding creates/patches, then the policy snapshot's `Scheduled`
/// condition.
#[instrument(skip_all, fields(placement = %policy_snapshot.placement_name))]
pub async fn reconcile(
    policy_snapshot: &PolicySnapshot,
    bindings_store: &dyn Store<Binding>,
    clusters: &[MemberCluster],
    eligibility: &dyn EligibilityChecker,
    clock: &dyn Clock,
    batch_limit: Option<u32>,
) -> Result<SchedulingOutcome, Error> {
    let selector = LabelSelector {
        match_labels: [(
            crate::model::LABEL_PLACEMENT_TRACKING.to_string(),
            policy_snapshot.placement_name.clone(),
        )]
        .into_iter()
        .collect(),
        match_expressions: vec![],
    };
    let existing = bindings_store
        .list_by_label(&selector)
        .await
        .context(StoreSnafu)?;
    let existing_bindings: Vec<Binding> = existing.into_iter().map(|v| v.value).collect();

    let outcome = plan(
        policy_snapshot,
        &existing_bindings,
        clusters,
        eligibility,
        clock,
        batch_limit,
    )?;

    for op in &outcome.ops {
        match op {
            BindingOp::Create(binding) => {
                tracing::info!(cluster = %binding.target_cluster, "creating binding");
                bindings_store
                    .create(binding.clone())
                    .await
                    .context(StoreSnafu)?;
            }
            BindingOp::Patch(binding) => {
                tracing::info!(cluster = %binding.target_cluster, state = ?binding.state, "patching binding");
                if let Some(existing) = bindings_store
                    .get(&binding.name)
                    .await
                    .context(StoreSnafu)?
                {
                    bindings_store
                        .update(crate::store::Versioned {
                            value: binding.clone(),
                            version: existing.version,
                        })
                        .await
                        .context(StoreSnafu)?;
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{Eligibility, Policy, PolicyAffinity};
    use jiff::Timestamp;
    use std::collections::BTreeMap;

    struct AlwaysEligible;
    impl EligibilityChecker for AlwaysEligible {
        fn check(&self, _cluster: &MemberCluster) -> Eligibility {
            Eligibility::eligible()
        }
    }

    fn cluster(name: &str) -> MemberCluster {
        MemberCluster {
            name: name.into(),
            labels: BTreeMap::new(),
            taints: vec![],
            properties: BTreeMap::new(),
            deletion_timestamp: None,
        }
    }

    fn policy_snapshot(policy: Policy) -> PolicySnapshot {
        PolicySnapshot {
            name: "p-1".into(),
            placement_name: "p".into(),
            policy,
            policy_index: 1,
            is_latest: true,
            observed_cluster_count: -1,
            generation: 1,
            conditions: Default::default(),
        }
    }

    #[test]
    fn pick_all_creates_a_binding_per_eligible_cluster() {
        let clusters = vec![cluster("a"), cluster("b"), cluster("c")];
        let snapshot = policy_snapshot(Policy::PickAll {
            affinity: PolicyAffinity {
                required: vec![],
                preferred: vec![],
            },
        });
        let clock = FixedClock::new(Timestamp::from_second(0).unwrap());
        let outcome = plan(&snapshot, &[], &clusters, &AlwaysEligible, &clock, None).unwrap();
        assert_eq!(outcome.ops.len(), 3);
        assert!(outcome.scheduled_condition.status.is_true());
    }

    #[test]
    fn pick_fixed_not_found_reports_partial_schedule() {
        let clusters = vec![cluster("a"), cluster("b")];
        let snapshot = policy_snapshot(Policy::PickFixed {
            cluster_names: vec!["a".into(), "b".into(), "x".into()],
        });
        let clock = FixedClock::new(Timestamp::from_second(0).unwrap());
        let outcome = plan(&snapshot, &[], &clusters, &AlwaysEligible, &clock, None).unwrap();
        assert_eq!(outcome.ops.len(), 2);
        assert!(!outcome.scheduled_condition.status.is_true());
        assert_eq!(
            outcome.decisions.iter().filter(|(_, d)| d.selected).count(),
            2
        );
    }

    #[test]
    fn pick_n_batch_limit_requests_requeue() {
        let clusters = vec![cluster("a"), cluster("b"), cluster("c")];
        let snapshot = policy_snapshot(Policy::PickN {
            desired_count: 3,
            affinity: PolicyAffinity {
                required: vec![],
                preferred: vec![],
            },
            topology_spread_constraints: vec![],
            tolerations: vec![],
        });
        let clock = FixedClock::new(Timestamp::from_second(0).unwrap());
        let outcome = plan(&snapshot, &[], &clusters, &AlwaysEligible, &clock, Some(1)).unwrap();
        assert_eq!(outcome.ops.len(), 1);
        assert!(outcome.requeue);
    }
}
