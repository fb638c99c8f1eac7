//! The rolling-update rollout controller: drives bindings' resource-snapshot reference
//! toward the latest master resource snapshot within an availability/surge envelope, and
//! drains Unscheduled bindings.
//!
//! Does nothing for a Placement whose rollout strategy is `External` — that Placement is
//! driven by [`crate::staged_update`] instead.

use std::collections::HashSet;
use std::time::Duration;

use jiff::Timestamp;
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::classify::classify_bindings;
use crate::config::{resolve_int_or_percent, IntOrPercentError, Rounding};
use crate::error::{ErrorClass, ErrorClassify};
use crate::model::{
    Binding, BindingConditionType, BindingState, MemberCluster, OverrideRefs, Placement,
    ResourceSnapshot, RollingUpdateConfig, RolloutStrategy, NOT_TRACKABLE_REASON,
};
use crate::status::{Condition, ConditionStatus};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("resolving rolling-update envelope"))]
    Envelope { source: IntOrPercentError },
}

impl ErrorClassify for Error {
    fn class(&self) -> ErrorClass {
        match self {
            Error::Envelope { .. } => ErrorClass::UserError,
        }
    }
}

/// Resolves a cluster's matched cluster-scoped and namespaced override references for a
/// resource snapshot. An external collaborator, like [`crate::model::EligibilityChecker`]:
/// implementations must be side-effect-free.
pub trait OverrideMatcher: Send + Sync {
    fn matched_overrides(&self, cluster: &MemberCluster) -> OverrideRefs;
}

/// An override matcher that never matches anything, for placements with no overrides
/// configured.
pub struct NoOverrides;
impl OverrideMatcher for NoOverrides {
    fn matched_overrides(&self, _cluster: &MemberCluster) -> OverrideRefs {
        OverrideRefs::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// Set when not ready because of the `unavailablePeriodSeconds` grace window: the
    /// remaining time until the binding would count as ready.
    pub wait_time: Option<Duration>,
}

/// Whether `binding` counts as ready for the purposes of the removal/promotion budgets.
pub fn binding_readiness(
    binding: &Binding,
    now: Timestamp,
    unavailable_period_seconds: u32,
) -> Readiness {
    if let Some(diff) = binding.condition_at_current_generation(BindingConditionType::DiffReported)
    {
        if diff.status.is_true() {
            return Readiness {
                ready: true,
                wait_time: None,
            };
        }
    }

    let Some(available) = binding.condition_at_current_generation(BindingConditionType::Available)
    else {
        return Readiness {
            ready: false,
            wait_time: None,
        };
    };
    if !available.status.is_true() {
        return Readiness {
            ready: false,
            wait_time: None,
        };
    }

    let trackable = available.reason.as_deref() != Some(NOT_TRACKABLE_REASON);
    if trackable {
        return Readiness {
            ready: true,
            wait_time: None,
        };
    }

    let Some(transitioned_at) = available.last_transition_time else {
        return Readiness {
            ready: false,
            wait_time: None,
        };
    };
    let elapsed = now.as_second() - transitioned_at.as_second();
    if elapsed >= i64::from(unavailable_period_seconds) {
        Readiness {
            ready: true,
            wait_time: None,
        }
    } else {
        Readiness {
            ready: false,
            wait_time: Some(Duration::from_secs(
                (i64::from(unavailable_period_seconds) - elapsed) as u64,
            )),
        }
    }
}

/// Per-cycle inputs the rollout controller needs, gathered by the caller from the stores.
pub struct RolloutInputs<'a> {
    pub placement: &'a Placement,
    pub bindings: &'a [Binding],
    pub clusters: &'a [MemberCluster],
    pub latest_policy_snapshot_name: &'a str,
    pub latest_resource_snapshot: Option<&'a ResourceSnapshot>,
    /// Desired cluster count: the policy's `desired_count` for PickN, the scheduled-binding
    /// count for PickAll, or the requested list length for PickFixed. The rollout
    /// controller doesn't read `Policy` directly, so the caller resolves this.
    pub target_count: u32,
    pub evicted_clusters: &'a HashSet<String>,
    pub override_matcher: &'a dyn OverrideMatcher,
}

#[derive(Debug, Default)]
pub struct RolloutOutcome {
    /// Bindings to patch in place (apply-strategy propagation, promotion, stale-status
    /// maintenance).
    pub patches: Vec<Binding>,
    /// Binding names to delete: drained Unscheduled bindings and evicted bindings that have
    /// themselves been unscheduled by a prior cycle.
    pub deletes: Vec<String>,
    /// The minimum `wait_time` across unready bindings, or `None` if nothing in this cycle
    /// is waiting on the grace window.
    pub requeue_after: Option<Duration>,
}

fn cluster_lookup<'a>(clusters: &'a [MemberCluster], name: &str) -> Option<&'a MemberCluster> {
    clusters.iter().find(|c| c.name == name)
}

fn desired_matches(binding: &Binding, resource_snapshot_name: &str, overrides: &OverrideRefs) -> bool {
    binding.resource_snapshot_name.as_deref() == Some(resource_snapshot_name)
        && binding.override_refs == *overrides
}

fn matched_overrides_for(inputs: &RolloutInputs<'_>, target_cluster: &str) -> OverrideRefs {
    match cluster_lookup(inputs.clusters, target_cluster) {
        Some(cluster) => inputs.override_matcher.matched_overrides(cluster),
        None => OverrideRefs::default(),
    }
}

/// The rolling-update pick algorithm for one cycle.
#[instrument(skip_all, fields(placement = %inputs.placement.name))]
pub fn plan(inputs: &RolloutInputs<'_>, now: Timestamp) -> Result<RolloutOutcome, Error> {
    let mut outcome = RolloutOutcome::default();

    let RolloutStrategy::RollingUpdate(envelope) = inputs
        .placement
        .rollout_strategy
        .clone()
        .unwrap_or(RolloutStrategy::RollingUpdate(RollingUpdateConfig::default()))
    else {
        // External strategy: the staged update runner drives this Placement instead.
        return Ok(outcome);
    };

    let effective_apply_strategy = inputs.placement.effective_apply_strategy();
    for binding in inputs.bindings {
        if binding.is_deleting() {
            continue;
        }
        if binding.apply_strategy != effective_apply_strategy {
            let mut patched = binding.clone();
            patched.apply_strategy = effective_apply_strategy.clone();
            outcome.patches.push(patched);
        }
    }

    let Some(resource_snapshot) = inputs.latest_resource_snapshot else {
        // No master resource snapshot yet: park until one appears.
        return Ok(outcome);
    };

    let classified = classify_bindings(
        inputs.bindings,
        inputs.clusters,
        inputs.latest_policy_snapshot_name,
    );

    let max_unavailable = resolve_int_or_percent(
        &envelope.max_unavailable,
        inputs.target_count,
        Rounding::Down,
    )
    .context(EnvelopeSnafu)?;
    let max_surge =
        resolve_int_or_percent(&envelope.max_surge, inputs.target_count, Rounding::Up)
            .context(EnvelopeSnafu)?;

    let ready_bound: Vec<&Binding> = classified
        .bound
        .iter()
        .filter(|b| binding_readiness(b, now, envelope.unavailable_period_seconds).ready)
        .copied()
        .collect();
    let ready_count = ready_bound.len() as u32;
    let applied_true_count = classified
        .bound
        .iter()
        .filter(|b| {
            b.condition_at_current_generation(BindingConditionType::Applied)
                .is_some_and(|c| c.status.is_true())
        })
        .count() as u32;
    let can_be_ready = applied_true_count + classified.scheduled.len() as u32;

    let unavailable_already = inputs.target_count.saturating_sub(ready_count);
    let removal_budget = max_unavailable.saturating_sub(unavailable_already);

    let mut removed_cluster_names = HashSet::new();
    for binding in &classified.unscheduled {
        outcome.deletes.push(binding.name.clone());
        removed_cluster_names.insert(binding.target_cluster.clone());
    }

    let evicted_steady_state: Vec<&Binding> = classified
        .steady_state()
        .filter(|b| inputs.evicted_clusters.contains(&b.target_cluster))
        .take(removal_budget as usize)
        .collect();
    for binding in &evicted_steady_state {
        outcome.deletes.push(binding.name.clone());
        removed_cluster_names.insert(binding.target_cluster.clone());
    }

    let update_budget = inputs
        .target_count
        .saturating_sub(can_be_ready)
        .saturating_add(max_surge)
        .saturating_add(max_unavailable.saturating_sub(evicted_steady_state.len() as u32));

    let mut failed_to_apply: Vec<&Binding> = Vec::new();
    let mut other_candidates: Vec<&Binding> = Vec::new();
    for binding in classified.scheduled.iter().chain(classified.bound.iter()) {
        if removed_cluster_names.contains(&binding.target_cluster) {
            continue;
        }
        let overrides = matched_overrides_for(inputs, &binding.target_cluster);
        let already_up_to_date = binding.state == BindingState::Bound
            && desired_matches(binding, &resource_snapshot.name, &overrides)
            && binding
                .condition_at_current_generation(BindingConditionType::RolloutStarted)
                .is_some_and(|c| c.status.is_true());
        if already_up_to_date {
            continue;
        }
        if binding.is_failed_to_apply() {
            failed_to_apply.push(binding);
        } else {
            other_candidates.push(binding);
        }
    }
    other_candidates.sort_by(|a, b| b.cluster_decision.score.cmp(&a.cluster_decision.score));

    let remaining_budget = (update_budget as usize).saturating_sub(failed_to_apply.len());
    let selected: Vec<&Binding> = failed_to_apply
        .into_iter()
        .chain(other_candidates.into_iter().take(remaining_budget))
        .collect();

    for binding in &selected {
        let overrides = matched_overrides_for(inputs, &binding.target_cluster);
        let mut patched = (*binding).clone();
        patched.state = BindingState::Bound;
        patched.resource_snapshot_name = Some(resource_snapshot.name.clone());
        patched.override_refs = overrides;
        patched.apply_strategy = effective_apply_strategy.clone();
        patched.conditions.set_with_fresh_transition(
            Condition::new(BindingConditionType::RolloutStarted, ConditionStatus::True)
                .with_reason("RolloutStarted")
                .with_observed_generation(binding.generation),
            now,
        );
        outcome.patches.push(patched);
    }

    let selected_names: HashSet<&str> =
        selected.iter().map(|b| b.name.as_str()).collect();
    for binding in classified.scheduled.iter().chain(classified.bound.iter()) {
        if selected_names.contains(binding.name.as_str()) {
            continue;
        }
        let stale = binding
            .condition_at_current_generation(BindingConditionType::RolloutStarted)
            .is_none();
        if stale {
            let mut patched = binding.clone();
            patched.conditions.set_with_fresh_transition(
                Condition::new(BindingConditionType::RolloutStarted, ConditionStatus::False)
                    .with_reason("NotStartedYet")
                    .with_observed_generation(binding.generation),
                now,
            );
            outcome.patches.push(patched);
        }
    }

    outcome.requeue_after = classified
        .bound
        .iter()
        .filter_map(|b| binding_readiness(b, now, envelope.unavailable_period_seconds).wait_time)
        .min();

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplyStrategy, ClusterDecision};
    use crate::status::ConditionSet;

    fn placement() -> Placement {
        Placement {
            name: "p".into(),
            resource_selectors: vec![],
            rollout_strategy: Some(RolloutStrategy::RollingUpdate(RollingUpdateConfig {
                max_unavailable: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(1),
                max_surge: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(0),
                unavailable_period_seconds: 30,
            })),
            apply_strategy: None,
            revision_history_limit: 10,
            generation: 1,
            conditions: Default::default(),
        }
    }

    fn resource_snapshot() -> ResourceSnapshot {
        ResourceSnapshot {
            name: "p-0".into(),
            placement_name: "p".into(),
            resource_index: 0,
            is_latest: true,
            resource_group_hash: Some("hash".into()),
            subindex: None,
        }
    }

    fn scheduled_binding(cluster: &str) -> Binding {
        Binding {
            name: format!("p-{cluster}"),
            placement_name: "p".into(),
            target_cluster: cluster.into(),
            policy_snapshot_name: "p-1".into(),
            resource_snapshot_name: None,
            cluster_decision: ClusterDecision::selected(None, "ok"),
            apply_strategy: ApplyStrategy::default(),
            override_refs: Default::default(),
            state: BindingState::Scheduled,
            previous_state: None,
            conditions: Default::default(),
            work_statuses: vec![],
            generation: 1,
            deletion_timestamp: None,
            has_scheduler_finalizer: true,
        }
    }

    #[test]
    fn promotes_scheduled_bindings_to_bound() {
        let p = placement();
        let rs = resource_snapshot();
        let bindings = vec![scheduled_binding("a"), scheduled_binding("b")];
        let clusters = vec![
            MemberCluster {
                name: "a".into(),
                labels: Default::default(),
                taints: vec![],
                properties: Default::default(),
                deletion_timestamp: None,
            },
            MemberCluster {
                name: "b".into(),
                labels: Default::default(),
                taints: vec![],
                properties: Default::default(),
                deletion_timestamp: None,
            },
        ];
        let evicted = HashSet::new();
        let inputs = RolloutInputs {
            placement: &p,
            bindings: &bindings,
            clusters: &clusters,
            latest_policy_snapshot_name: "p-1",
            latest_resource_snapshot: Some(&rs),
            target_count: 2,
            evicted_clusters: &evicted,
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = plan(&inputs, now).unwrap();
        assert_eq!(outcome.patches.len(), 2);
        assert!(outcome
            .patches
            .iter()
            .all(|b| b.state == BindingState::Bound && b.resource_snapshot_name.as_deref() == Some("p-0")));
    }

    #[test]
    fn unscheduled_bindings_are_drained() {
        let p = placement();
        let rs = resource_snapshot();
        let mut b = scheduled_binding("a");
        b.state = BindingState::Unscheduled;
        b.previous_state = Some(BindingState::Bound);
        let bindings = vec![b];
        let evicted = HashSet::new();
        let inputs = RolloutInputs {
            placement: &p,
            bindings: &bindings,
            clusters: &[],
            latest_policy_snapshot_name: "p-1",
            latest_resource_snapshot: Some(&rs),
            target_count: 0,
            evicted_clusters: &evicted,
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = plan(&inputs, now).unwrap();
        assert_eq!(outcome.deletes, vec!["p-a".to_string()]);
    }

    #[test]
    fn parks_without_a_resource_snapshot() {
        let p = placement();
        let bindings = vec![scheduled_binding("a")];
        let evicted = HashSet::new();
        let inputs = RolloutInputs {
            placement: &p,
            bindings: &bindings,
            clusters: &[],
            latest_policy_snapshot_name: "p-1",
            latest_resource_snapshot: None,
            target_count: 1,
            evicted_clusters: &evicted,
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = plan(&inputs, now).unwrap();
        assert!(outcome.patches.is_empty());
        assert!(outcome.deletes.is_empty());
    }

    #[test]
    fn external_strategy_is_a_noop() {
        let mut p = placement();
        p.rollout_strategy = Some(RolloutStrategy::External);
        let rs = resource_snapshot();
        let bindings = vec![scheduled_binding("a")];
        let evicted = HashSet::new();
        let inputs = RolloutInputs {
            placement: &p,
            bindings: &bindings,
            clusters: &[],
            latest_policy_snapshot_name: "p-1",
            latest_resource_snapshot: Some(&rs),
            target_count: 1,
            evicted_clusters: &evicted,
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = plan(&inputs, now).unwrap();
        assert!(outcome.patches.is_empty());
    }

    #[test]
    fn readiness_honors_unavailable_grace_window() {
        let mut b = scheduled_binding("a");
        b.state = BindingState::Bound;
        b.generation = 1;
        let mut conditions = ConditionSet::new();
        conditions.set(
            Condition::new(BindingConditionType::Available, ConditionStatus::True)
                .with_reason(NOT_TRACKABLE_REASON)
                .with_observed_generation(1)
                .with_transition_time(Timestamp::from_second(0).unwrap()),
        );
        b.conditions = conditions;

        let just_after = Timestamp::from_second(10).unwrap();
        let r = binding_readiness(&b, just_after, 30);
        assert!(!r.ready);
        assert_eq!(r.wait_time, Some(Duration::from_secs(20)));

        let well_after = Timestamp::from_second(31).unwrap();
        let r = binding_readiness(&b, well_after, 30);
        assert!(r.ready);
    }
}
