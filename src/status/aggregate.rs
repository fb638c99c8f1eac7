use jiff::Timestamp;

use crate::model::{
    Binding, BindingConditionType, PlacementConditionType, WorkConditionType, WorkObjectStatus,
    NOT_TRACKABLE_REASON,
};
use crate::status::{Condition, ConditionSet, ConditionStatus};

/// Rolls a binding's per-manifest work-object statuses up into its `Applied`/`Available`
/// aggregate conditions.
///
/// `Applied=True` iff every work object observed at `generation` reports `Applied=True`;
/// otherwise `False`. `Available=True` iff every work object reports `Available=True`;
/// if any of those reports the [`NOT_TRACKABLE_REASON`], the aggregate carries that same
/// reason so the rollout controller's readiness predicate can apply the grace window.
/// If no work object has been observed at `generation` yet, both conditions are `Unknown`.
pub fn aggregate_binding_condition(
    work_statuses: &[WorkObjectStatus],
    generation: i64,
    now: Timestamp,
) -> (
    Condition<BindingConditionType>,
    Condition<BindingConditionType>,
) {
    let observed: Vec<&WorkObjectStatus> = work_statuses
        .iter()
        .filter(|w| w.observed_generation == generation)
        .collect();

    if observed.is_empty() {
        let unknown = |type_| {
            Condition::new(type_, ConditionStatus::Unknown)
                .with_reason("NoWorkObjectsObserved")
                .with_observed_generation(generation)
                .with_transition_time(now)
        };
        return (
            unknown(BindingConditionType::Applied),
            unknown(BindingConditionType::Available),
        );
    }

    let applied_status = observed
        .iter()
        .map(|w| {
            w.conditions
                .get(&WorkConditionType::Applied)
                .map_or(ConditionStatus::Unknown, |c| c.status)
        })
        .max()
        .expect("observed is non-empty");
    let applied = Condition::new(BindingConditionType::Applied, applied_status)
        .with_observed_generation(generation)
        .with_transition_time(now);

    let mut not_trackable_reason = None;
    let available_status = observed
        .iter()
        .map(|w| match w.conditions.get(&WorkConditionType::Available) {
            Some(c) => {
                if c.reason.as_deref() == Some(NOT_TRACKABLE_REASON) {
                    not_trackable_reason = Some(NOT_TRACKABLE_REASON.to_string());
                }
                c.status
            }
            None => ConditionStatus::Unknown,
        })
        .max()
        .expect("observed is non-empty");

    let mut available = Condition::new(BindingConditionType::Available, available_status)
        .with_observed_generation(generation)
        .with_transition_time(now);
    if available_status.is_true() {
        if let Some(reason) = not_trackable_reason {
            available = available.with_reason(reason);
        }
    }

    (applied, available)
}

/// One cluster's failure reported in the truncated failed-placement list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPlacement {
    pub cluster_name: String,
    pub condition_type: BindingConditionType,
    pub reason: Option<String>,
}

/// Result of fanning bindings' per-binding conditions into Placement-level status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementStatus {
    pub conditions: ConditionSet<PlacementConditionType>,
    pub failed_placements: Vec<FailedPlacement>,
    pub failed_placements_truncated: bool,
}

/// Builds Placement-level status by folding every selected binding's per-generation
/// conditions through the five sequential stages. Mirrors the
/// `DeploymentConditionBuilder`/`ConditionBuilder` pattern: one condition per stage, its
/// status the worst (by [`ConditionStatus`] ordering) of every binding's status at that
/// stage, its message stating how many clusters are in that state.
pub struct PlacementStatusAggregator {
    failed_placement_limit: usize,
}

impl PlacementStatusAggregator {
    pub fn new(failed_placement_limit: usize) -> Self {
        Self {
            failed_placement_limit,
        }
    }

    fn binding_condition_type(stage: PlacementConditionType) -> BindingConditionType {
        match stage {
            PlacementConditionType::RolloutStarted => BindingConditionType::RolloutStarted,
            PlacementConditionType::Overridden => BindingConditionType::Overridden,
            PlacementConditionType::WorkCreated => BindingConditionType::WorkCreated,
            PlacementConditionType::Applied => BindingConditionType::Applied,
            PlacementConditionType::Available => BindingConditionType::Available,
        }
    }

    pub fn aggregate(&self, bindings: &[&Binding], now: Timestamp) -> PlacementStatus {
        let total = bindings.len();
        let mut conditions = ConditionSet::new();

        for stage in PlacementConditionType::STAGES {
            let binding_type = Self::binding_condition_type(stage);
            let mut true_count = 0usize;
            let mut worst = ConditionStatus::True;

            for binding in bindings {
                let status = binding
                    .condition_at_current_generation(binding_type)
                    .map_or(ConditionStatus::Unknown, |c| c.status);
                if status.is_true() {
                    true_count += 1;
                }
                worst = worst.max(status);
            }

            let message = if total == 0 {
                format!("no clusters selected for stage {stage:?}")
            } else {
                format!("{true_count}/{total} clusters are {stage:?}")
            };

            conditions.set(
                Condition::new(stage, worst)
                    .with_message(message)
                    .with_transition_time(now),
            );
        }

        let (failed_placements, failed_placements_truncated) =
            self.collect_failed_placements(bindings);

        PlacementStatus {
            conditions,
            failed_placements,
            failed_placements_truncated,
        }
    }

    fn collect_failed_placements(&self, bindings: &[&Binding]) -> (Vec<FailedPlacement>, bool) {
        let mut failures = Vec::new();
        let mut truncated = false;

        'bindings: for binding in bindings {
            for stage in PlacementConditionType::STAGES {
                let binding_type = Self::binding_condition_type(stage);
                let not_true = binding
                    .condition_at_current_generation(binding_type)
                    .is_some_and(|c| !c.status.is_true());
                if not_true {
                    if failures.len() >= self.failed_placement_limit {
                        truncated = true;
                        break 'bindings;
                    }
                    let condition = binding.condition_at_current_generation(binding_type);
                    failures.push(FailedPlacement {
                        cluster_name: binding.target_cluster.clone(),
                        condition_type: binding_type,
                        reason: condition.and_then(|c| c.reason.clone()),
                    });
                    // Only the first non-True condition per binding is recorded.
                    continue 'bindings;
                }
            }
        }

        (failures, truncated)
    }
}
