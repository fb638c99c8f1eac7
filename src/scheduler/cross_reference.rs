//! Cross-references a policy snapshot's picked clusters against existing bindings,
//! producing the create/patch operations described for the scheduler's cross-reference and
//! dedup step, plus the PickN downscale pass.

use std::collections::{HashMap, HashSet};

use jiff::Timestamp;

use crate::classify::ClassifiedBindings;
use crate::model::{deterministic_binding_name, Binding, BindingState, ScoredCluster};
use crate::scheduler::pick::ClusterPick;
use crate::scheduler::{Error, MissingPreviousStateSnafu};

#[derive(Debug, Clone)]
pub enum BindingOp {
    Create(Binding),
    Patch(Binding),
}

/// Cross-references picked clusters against the Placement's classified bindings.
/// `picks` must already be filtered to the selected entries only.
pub fn cross_reference(
    placement_name: &str,
    latest_policy_snapshot_name: &str,
    generation: i64,
    classified: &ClassifiedBindings,
    picks: &[ClusterPick],
    now: Timestamp,
) -> Result<Vec<BindingOp>, Error> {
    let picked: HashMap<&str, &ClusterPick> = picks
        .iter()
        .map(|p| (p.cluster_name.as_str(), p))
        .collect();
    let mut ops = Vec::new();
    let mut touched: HashSet<&str> = HashSet::new();

    // Scheduled/bound on the latest snapshot are already correct; nothing to do here even
    // if no longer picked — downscale (PickN) or drain (rollout) handles that separately.
    for binding in classified.steady_state() {
        touched.insert(binding.target_cluster.as_str());
    }

    for binding in &classified.obsolete {
        touched.insert(binding.target_cluster.as_str());
        if let Some(pick) = picked.get(binding.target_cluster.as_str()) {
            let mut patched = (*binding).clone();
            patched.policy_snapshot_name = latest_policy_snapshot_name.to_string();
            patched.cluster_decision = pick.decision.clone();
            ops.push(BindingOp::Patch(patched));
        } else {
            ops.push(BindingOp::Patch(unschedule(binding)));
        }
    }

    for binding in &classified.dangling {
        touched.insert(binding.target_cluster.as_str());
        ops.push(BindingOp::Patch(unschedule(binding)));
    }

    for binding in &classified.unscheduled {
        touched.insert(binding.target_cluster.as_str());
        if let Some(pick) = picked.get(binding.target_cluster.as_str()) {
            let previous_state = binding.previous_state.ok_or_else(|| {
                MissingPreviousStateSnafu {
                    cluster_name: binding.target_cluster.clone(),
                }
                .build()
            })?;
            let mut patched = (*binding).clone();
            patched.state = previous_state;
            patched.previous_state = None;
            patched.policy_snapshot_name = latest_policy_snapshot_name.to_string();
            patched.cluster_decision = pick.decision.clone();
            ops.push(BindingOp::Patch(patched));
        }
    }

    for pick in picks {
        if touched.contains(pick.cluster_name.as_str()) {
            continue;
        }
        let name = deterministic_binding_name(placement_name, &pick.cluster_name);
        ops.push(BindingOp::Create(Binding {
            name,
            placement_name: placement_name.to_string(),
            target_cluster: pick.cluster_name.clone(),
            policy_snapshot_name: latest_policy_snapshot_name.to_string(),
            resource_snapshot_name: None,
            cluster_decision: pick.decision.clone(),
            apply_strategy: Default::default(),
            override_refs: Default::default(),
            state: BindingState::Scheduled,
            previous_state: None,
            conditions: Default::default(),
            work_statuses: Vec::new(),
            generation,
            deletion_timestamp: None,
            has_scheduler_finalizer: true,
        }));
    }

    let _ = now;
    Ok(ops)
}

fn unschedule(binding: &Binding) -> Binding {
    let mut patched = binding.clone();
    patched.previous_state = Some(patched.state);
    patched.state = BindingState::Unscheduled;
    patched
}

/// PickN downscale: when `desired_count` drops below the number of steady-state bindings,
/// trims the lowest-scored ones (nil scores first) down to `desired_count`, counting
/// obsolete bindings toward the trim so an in-flight snapshot transition doesn't dodge it.
pub fn downscale<'a>(
    steady_state: impl IntoIterator<Item = &'a Binding>,
    obsolete: impl IntoIterator<Item = &'a Binding>,
    desired_count: u32,
) -> Vec<BindingOp> {
    let mut all: Vec<&Binding> = steady_state.into_iter().chain(obsolete).collect();
    let desired = desired_count as usize;
    if all.len() <= desired {
        return Vec::new();
    }

    all.sort_by_cached_key(|b| ScoredCluster {
        cluster_name: b.target_cluster.clone(),
        score: b.cluster_decision.score,
    });

    let excess = all.len() - desired;
    all.into_iter()
        .take(excess)
        .map(|b| BindingOp::Patch(unschedule(b)))
        .collect()
}
