//! Initialization: computes an [`UpdateRun`]'s stage list once, from the Placement, the
//! latest policy snapshot, the current bindings, and a frozen strategy snapshot. Idempotent
//! — calling this again on an already-initialized run is a no-op.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use jiff::Timestamp;

use crate::model::{
    Binding, BindingState, MemberCluster, Placement, Policy, PolicySnapshot, ResourceSnapshot,
    Stage, StageClusterEntry, StageSpec, StrategySnapshot, UpdateRun, UpdateRunConditionType,
};
use crate::rollout::OverrideMatcher;
use crate::status::{Condition, ConditionStatus};

use super::{
    DuplicateAfterStageTaskTypeSnafu, DuplicateClusterAcrossStagesSnafu, Error,
    NonPositiveTimedWaitDurationSnafu, NotExternalStrategySnafu, ObservedCountMismatchSnafu,
    PolicySnapshotNotScheduledSnafu, ResourceSnapshotNotFoundSnafu, StaleBindingPolicySnapshotSnafu,
};

pub struct InitializationInputs<'a> {
    pub placement: &'a Placement,
    pub latest_policy_snapshot: &'a PolicySnapshot,
    pub bindings: &'a [Binding],
    pub resource_snapshots: &'a [ResourceSnapshot],
    pub strategy_snapshot: &'a StrategySnapshot,
    pub clusters: &'a [MemberCluster],
    pub override_matcher: &'a dyn OverrideMatcher,
}

fn validate_strategy_snapshot(strategy: &StrategySnapshot) -> Result<(), Error> {
    for stage in &strategy.stages {
        let mut seen = HashSet::new();
        for task in &stage.after_stage_tasks {
            if !seen.insert(task.type_name()) {
                return Err(DuplicateAfterStageTaskTypeSnafu {
                    stage: stage.name.clone(),
                }
                .build());
            }
            if let crate::model::AfterStageTask::TimedWait { duration } = task {
                if duration.is_zero() {
                    return Err(NonPositiveTimedWaitDurationSnafu {
                        stage: stage.name.clone(),
                    }
                    .build());
                }
            }
        }
    }
    Ok(())
}

fn sort_key_for(stage_spec: &StageSpec, cluster: &MemberCluster) -> (i64, String) {
    let rank = stage_spec
        .sort_label_key
        .as_ref()
        .and_then(|key| cluster.labels.get(key))
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    (rank, cluster.name.clone())
}

fn compute_stages(
    strategy: &StrategySnapshot,
    selected_clusters: &[&MemberCluster],
    override_matcher: &dyn OverrideMatcher,
) -> Result<Vec<Stage>, Error> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut stages = Vec::with_capacity(strategy.stages.len());

    for stage_spec in &strategy.stages {
        let members: Vec<&MemberCluster> = selected_clusters
            .iter()
            .filter(|c| stage_spec.label_selector.matches_cluster(c))
            .copied()
            .sorted_by_key(|c| sort_key_for(stage_spec, c))
            .collect();

        let mut entries = Vec::with_capacity(members.len());
        for cluster in members {
            if !claimed.insert(cluster.name.clone()) {
                return Err(DuplicateClusterAcrossStagesSnafu {
                    cluster_name: cluster.name.clone(),
                }
                .build());
            }
            let overrides = override_matcher.matched_overrides(cluster);
            let mut entry = StageClusterEntry::pending(cluster.name.clone());
            entry.cluster_scoped_override_refs = overrides.cluster_scoped;
            entry.namespaced_override_refs = overrides.namespaced;
            entries.push(entry);
        }

        stages.push(Stage {
            name: stage_spec.name.clone(),
            clusters: entries,
            after_stage_tasks: stage_spec.after_stage_tasks.clone(),
            task_conditions: vec![Default::default(); stage_spec.after_stage_tasks.len()],
            conditions: Default::default(),
        });
    }
    Ok(stages)
}

/// Computes the run's full stage list from its frozen inputs. A no-op if `run` is already
/// `Initialized=True`.
pub fn initialize(
    run: &UpdateRun,
    inputs: &InitializationInputs<'_>,
    now: Timestamp,
) -> Result<UpdateRun, Error> {
    if run.is_initialized() {
        return Ok(run.clone());
    }
    let mut run = run.clone();

    let is_external = inputs
        .placement
        .rollout_strategy
        .as_ref()
        .is_some_and(crate::model::RolloutStrategy::is_external);
    if !is_external {
        return Err(NotExternalStrategySnafu {
            name: inputs.placement.name.clone(),
        }
        .build());
    }

    let snapshot = inputs.latest_policy_snapshot;
    let scheduled_ok = snapshot.is_latest
        && snapshot
            .conditions
            .get(&crate::model::PolicyConditionType::Scheduled)
            .is_some_and(|c| c.status.is_true() && c.observed_at_generation(snapshot.generation));
    if !scheduled_ok {
        return Err(PolicySnapshotNotScheduledSnafu {
            name: snapshot.name.clone(),
        }
        .build());
    }
    run.policy_index = Some(snapshot.policy_index);

    let mut selected = Vec::new();
    let mut to_be_deleted = Vec::new();
    for binding in inputs.bindings {
        let on_latest = binding.policy_snapshot_name == snapshot.name;
        match (on_latest, binding.state) {
            (true, BindingState::Unscheduled) => to_be_deleted.push(binding),
            (true, _) => selected.push(binding),
            (false, BindingState::Unscheduled) => {}
            (false, _) => {
                return Err(StaleBindingPolicySnapshotSnafu {
                    cluster_name: binding.target_cluster.clone(),
                }
                .build())
            }
        }
    }

    let observed_count_ok = match &snapshot.policy {
        Policy::PickN { desired_count, .. } => selected.len() as u32 == *desired_count,
        Policy::PickFixed { cluster_names } => selected.len() == cluster_names.len(),
        Policy::PickAll { .. } | Policy::External => true,
    };
    if !observed_count_ok {
        return Err(ObservedCountMismatchSnafu.build());
    }

    validate_strategy_snapshot(inputs.strategy_snapshot)?;

    let master_snapshot = inputs
        .resource_snapshots
        .iter()
        .find(|s| s.resource_index == run.resource_snapshot_index && s.is_master());
    if master_snapshot.is_none() {
        return Err(ResourceSnapshotNotFoundSnafu {
            index: run.resource_snapshot_index,
        }
        .build());
    }

    let clusters_by_name: HashMap<&str, &MemberCluster> =
        inputs.clusters.iter().map(|c| (c.name.as_str(), c)).collect();
    let selected_clusters: Vec<&MemberCluster> = selected
        .iter()
        .filter_map(|b| clusters_by_name.get(b.target_cluster.as_str()).copied())
        .collect();

    run.stages = compute_stages(inputs.strategy_snapshot, &selected_clusters, inputs.override_matcher)?;

    let mut deletion_entries: Vec<&Binding> = to_be_deleted;
    deletion_entries.sort_by(|a, b| a.target_cluster.cmp(&b.target_cluster));
    run.deletion_stage = Some(Stage {
        name: "deletion".to_string(),
        clusters: deletion_entries
            .iter()
            .map(|b| StageClusterEntry::pending(b.target_cluster.clone()))
            .collect(),
        after_stage_tasks: Vec::new(),
        task_conditions: Vec::new(),
        conditions: Default::default(),
    });

    run.current_stage_index = 0;
    run.conditions.set_with_fresh_transition(
        Condition::new(UpdateRunConditionType::Initialized, ConditionStatus::True)
            .with_message("stages computed")
            .with_observed_generation(run.generation)
            .with_transition_time(now),
        now,
    );

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ApplyStrategy, ClusterDecision, OverrideRefs, Placement, PolicyAffinity,
        PolicyConditionType, RolloutStrategy,
    };
    use crate::label_selector::LabelSelector;
    use std::collections::BTreeMap;

    struct NoOverrides;
    impl OverrideMatcher for NoOverrides {
        fn matched_overrides(&self, _cluster: &MemberCluster) -> OverrideRefs {
            OverrideRefs::default()
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

    fn binding(cluster: &str, state: BindingState, snapshot: &str) -> Binding {
        Binding {
            name: format!("p-{cluster}"),
            placement_name: "p".into(),
            target_cluster: cluster.into(),
            policy_snapshot_name: snapshot.into(),
            resource_snapshot_name: None,
            cluster_decision: ClusterDecision::selected(None, "ok"),
            apply_strategy: ApplyStrategy::default(),
            override_refs: OverrideRefs::default(),
            state,
            previous_state: None,
            conditions: Default::default(),
            work_statuses: vec![],
            generation: 1,
            deletion_timestamp: None,
            has_scheduler_finalizer: true,
        }
    }

    fn placement(external: bool) -> Placement {
        Placement {
            name: "p".into(),
            resource_selectors: vec![],
            rollout_strategy: Some(if external {
                RolloutStrategy::External
            } else {
                RolloutStrategy::RollingUpdate(Default::default())
            }),
            apply_strategy: None,
            revision_history_limit: 10,
            generation: 1,
            conditions: Default::default(),
        }
    }

    fn scheduled_snapshot() -> PolicySnapshot {
        let mut snapshot = PolicySnapshot {
            name: "p-1".into(),
            placement_name: "p".into(),
            policy: Policy::PickAll {
                affinity: PolicyAffinity {
                    required: vec![],
                    preferred: vec![],
                },
            },
            policy_index: 1,
            is_latest: true,
            observed_cluster_count: 2,
            generation: 1,
            conditions: Default::default(),
        };
        snapshot.conditions.set(
            Condition::new(PolicyConditionType::Scheduled, ConditionStatus::True)
                .with_observed_generation(1),
        );
        snapshot
    }

    fn run() -> UpdateRun {
        UpdateRun {
            name: "run-1".into(),
            placement_name: "p".into(),
            resource_snapshot_index: 0,
            strategy_snapshot_name: "s-1".into(),
            generation: 1,
            policy_index: None,
            stages: vec![],
            deletion_stage: None,
            current_stage_index: 0,
            conditions: Default::default(),
        }
    }

    #[test]
    fn rejects_non_external_placement() {
        let inputs = InitializationInputs {
            placement: &placement(false),
            latest_policy_snapshot: &scheduled_snapshot(),
            bindings: &[],
            resource_snapshots: &[],
            strategy_snapshot: &StrategySnapshot {
                name: "s-1".into(),
                stages: vec![],
            },
            clusters: &[],
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let err = initialize(&run(), &inputs, now).unwrap_err();
        assert!(matches!(err, Error::NotExternalStrategy { .. }));
    }

    #[test]
    fn computes_stages_from_label_selector() {
        let a = cluster("a");
        let b = cluster("b");
        let bindings = vec![
            binding("a", BindingState::Bound, "p-1"),
            binding("b", BindingState::Bound, "p-1"),
        ];
        let resource_snapshots = vec![ResourceSnapshot {
            name: "r-0".into(),
            placement_name: "p".into(),
            resource_index: 0,
            is_latest: true,
            resource_group_hash: Some("h".into()),
            subindex: None,
        }];
        let strategy = StrategySnapshot {
            name: "s-1".into(),
            stages: vec![StageSpec {
                name: "stage-1".into(),
                label_selector: LabelSelector::everything(),
                sort_label_key: None,
                after_stage_tasks: vec![],
            }],
        };
        let inputs = InitializationInputs {
            placement: &placement(true),
            latest_policy_snapshot: &scheduled_snapshot(),
            bindings: &bindings,
            resource_snapshots: &resource_snapshots,
            strategy_snapshot: &strategy,
            clusters: &[a, b],
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let initialized = initialize(&run(), &inputs, now).unwrap();
        assert!(initialized.is_initialized());
        assert_eq!(initialized.stages.len(), 1);
        assert_eq!(initialized.stages[0].clusters.len(), 2);
        assert_eq!(initialized.policy_index, Some(1));
    }

    #[test]
    fn rejects_zero_duration_timed_wait() {
        let a = cluster("a");
        let bindings = vec![binding("a", BindingState::Bound, "p-1")];
        let resource_snapshots = vec![ResourceSnapshot {
            name: "r-0".into(),
            placement_name: "p".into(),
            resource_index: 0,
            is_latest: true,
            resource_group_hash: Some("h".into()),
            subindex: None,
        }];
        let strategy = StrategySnapshot {
            name: "s-1".into(),
            stages: vec![StageSpec {
                name: "stage-1".into(),
                label_selector: LabelSelector::everything(),
                sort_label_key: None,
                after_stage_tasks: vec![crate::model::AfterStageTask::timed_wait("0s").unwrap()],
            }],
        };
        let inputs = InitializationInputs {
            placement: &placement(true),
            latest_policy_snapshot: &scheduled_snapshot(),
            bindings: &bindings,
            resource_snapshots: &resource_snapshots,
            strategy_snapshot: &strategy,
            clusters: &[a],
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let err = initialize(&run(), &inputs, now).unwrap_err();
        assert!(matches!(err, Error::NonPositiveTimedWaitDuration { .. }));
    }

    #[test]
    fn is_idempotent_once_initialized() {
        let mut already = run();
        already.conditions.set(Condition::new(
            UpdateRunConditionType::Initialized,
            ConditionStatus::True,
        ));
        let inputs = InitializationInputs {
            placement: &placement(false),
            latest_policy_snapshot: &scheduled_snapshot(),
            bindings: &[],
            resource_snapshots: &[],
            strategy_snapshot: &StrategySnapshot {
                name: "s-1".into(),
                stages: vec![],
            },
            clusters: &[],
            override_matcher: &NoOverrides,
        };
        let now = Timestamp::from_second(0).unwrap();
        let result = initialize(&already, &inputs, now).unwrap();
        assert_eq!(result, already);
    }
}
