//! Binding classification: a pure function shared by the scheduler and the rollout
//! controller. Partitions a Placement's bindings into six disjoint sets by evaluating, in
//! priority order, deletion, unscheduled state, cluster absence, snapshot staleness, and
//! finally the two steady-state classes.

use std::collections::HashMap;

use crate::model::{Binding, BindingState, MemberCluster};

#[derive(Debug, Clone, Default)]
pub struct ClassifiedBindings<'a> {
    pub deleting: Vec<&'a Binding>,
    pub unscheduled: Vec<&'a Binding>,
    pub dangling: Vec<&'a Binding>,
    pub obsolete: Vec<&'a Binding>,
    pub scheduled: Vec<&'a Binding>,
    pub bound: Vec<&'a Binding>,
}

impl<'a> ClassifiedBindings<'a> {
    /// Bindings whose policy-snapshot reference is current and which are not being torn
    /// down: the set rollout and the staged update runner both drive.
    pub fn steady_state(&self) -> impl Iterator<Item = &'a Binding> + '_ {
        self.scheduled.iter().chain(self.bound.iter()).copied()
    }
}

pub fn classify_bindings<'a>(
    bindings: &'a [Binding],
    clusters: &[MemberCluster],
    latest_policy_snapshot_name: &str,
) -> ClassifiedBindings<'a> {
    let clusters_by_name: HashMap<&str, &MemberCluster> =
        clusters.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut out = ClassifiedBindings::default();
    for binding in bindings {
        if binding.is_deleting() {
            out.deleting.push(binding);
            continue;
        }
        if binding.state == BindingState::Unscheduled {
            out.unscheduled.push(binding);
            continue;
        }
        let cluster_gone = clusters_by_name
            .get(binding.target_cluster.as_str())
            .is_none_or(|c| c.is_deleting());
        if cluster_gone {
            out.dangling.push(binding);
            continue;
        }
        if binding.policy_snapshot_name != latest_policy_snapshot_name {
            out.obsolete.push(binding);
            continue;
        }
        match binding.state {
            BindingState::Scheduled => out.scheduled.push(binding),
            BindingState::Bound => out.bound.push(binding),
            BindingState::Unscheduled => unreachable!("handled above"),
        }
    }
    out
}
