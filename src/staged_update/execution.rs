//! The execution loop: advances one [`UpdateRun`] by at most a single state transition per
//! call (start a cluster, observe a cluster finish, elapse a wait, create or accept an
//! approval, or delete a binding), reconstructing progress entirely from the run's and its
//! bindings' durable fields.

use std::collections::HashMap;
use std::time::Duration;

use jiff::Timestamp;
use tracing::instrument;

use crate::model::{
    AfterStageTask, ApplyStrategy, ApprovalRequest, ApprovalRequestConditionType, Binding,
    BindingConditionType, BindingState, OverrideRefs, ProgressingReason, Stage, StageClusterEntry,
    StageConditionType, TaskConditionType, UpdateRun, UpdateRunConditionType,
};
use crate::status::{Condition, ConditionStatus};

use super::{DeletionInvariantViolatedSnafu, Error, MissingBindingSnafu};

#[derive(Debug, Clone)]
pub enum ApprovalRequestOp {
    Create(ApprovalRequest),
    Patch(ApprovalRequest),
}

pub struct ExecutionInputs<'a> {
    pub bindings: &'a [Binding],
    pub resource_snapshot_name: &'a str,
    pub apply_strategy: &'a ApplyStrategy,
    pub approval_requests: &'a [ApprovalRequest],
    /// How long a cluster may sit `started && !succeeded` before the run's `Progressing`
    /// condition is flagged `Stuck`. Purely informational: the run keeps polling either way.
    pub stuck_threshold: Duration,
}

#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub run: Option<UpdateRun>,
    pub binding_patches: Vec<Binding>,
    pub binding_deletes: Vec<String>,
    pub approval_request_ops: Vec<ApprovalRequestOp>,
    pub requeue_after: Option<Duration>,
}

fn elapsed(now: Timestamp, since: Timestamp) -> Duration {
    let secs = (now.as_second() - since.as_second()).max(0);
    Duration::from_secs(secs as u64)
}

fn desired_override_refs(entry: &StageClusterEntry) -> OverrideRefs {
    OverrideRefs {
        cluster_scoped: entry.cluster_scoped_override_refs.clone(),
        namespaced: entry.namespaced_override_refs.clone(),
    }
}

fn binding_matches_desired(
    binding: &Binding,
    resource_snapshot_name: &str,
    overrides: &OverrideRefs,
    apply_strategy: &ApplyStrategy,
) -> bool {
    binding.state == BindingState::Bound
        && binding.resource_snapshot_name.as_deref() == Some(resource_snapshot_name)
        && &binding.override_refs == overrides
        && &binding.apply_strategy == apply_strategy
}

fn drive_binding(
    binding: &Binding,
    resource_snapshot_name: &str,
    overrides: &OverrideRefs,
    apply_strategy: &ApplyStrategy,
    run_name: &str,
    now: Timestamp,
) -> Binding {
    let mut patched = binding.clone();
    patched.state = BindingState::Bound;
    patched.resource_snapshot_name = Some(resource_snapshot_name.to_string());
    patched.override_refs = overrides.clone();
    patched.apply_strategy = apply_strategy.clone();
    patched.conditions.set_with_fresh_transition(
        Condition::new(BindingConditionType::RolloutStarted, ConditionStatus::True)
            .with_reason("UpdateRunStarted")
            .with_message(format!("started by update run {run_name}"))
            .with_observed_generation(patched.generation),
        now,
    );
    patched
}

/// One cluster's outcome within a regular stage's drive loop.
enum ClusterStep {
    /// This cluster already succeeded; keep scanning the stage.
    Continue,
    /// A transition was made or the run must keep waiting on this exact cluster; stop the
    /// whole drive for this call.
    Stop,
}

struct StageDriveResult {
    step: ClusterStep,
    stuck: bool,
}

fn drive_regular_stage(
    stage: &mut Stage,
    bindings_by_cluster: &HashMap<&str, &Binding>,
    inputs: &ExecutionInputs<'_>,
    run_name: &str,
    now: Timestamp,
    outcome: &mut ExecutionOutcome,
) -> Result<Option<StageDriveResult>, Error> {
    for entry in &mut stage.clusters {
        if entry.is_finished() {
            continue;
        }
        if entry.succeeded == Some(false) {
            return Ok(Some(StageDriveResult {
                step: ClusterStep::Stop,
                stuck: false,
            }));
        }

        let binding = *bindings_by_cluster
            .get(entry.cluster_name.as_str())
            .ok_or_else(|| {
                MissingBindingSnafu {
                    cluster_name: entry.cluster_name.clone(),
                }
                .build()
            })?;
        let overrides = desired_override_refs(entry);

        if !entry.started {
            let patched = drive_binding(
                binding,
                inputs.resource_snapshot_name,
                &overrides,
                inputs.apply_strategy,
                run_name,
                now,
            );
            outcome.binding_patches.push(patched);
            entry.started = true;
            entry.started_transition_time = Some(now);
            outcome.requeue_after = Some(Duration::from_secs(1));
            return Ok(Some(StageDriveResult {
                step: ClusterStep::Stop,
                stuck: false,
            }));
        }

        if !binding_matches_desired(
            binding,
            inputs.resource_snapshot_name,
            &overrides,
            inputs.apply_strategy,
        ) {
            // Something else mutated the binding out from under the run: preempted.
            return Ok(None);
        }

        let available = binding
            .condition_at_current_generation(BindingConditionType::Available)
            .is_some_and(|c| c.status.is_true());
        let diff_reported = binding
            .condition_at_current_generation(BindingConditionType::DiffReported)
            .is_some_and(|c| c.status.is_true());
        let failed = binding.is_failed_to_apply();

        if available || diff_reported {
            entry.succeeded = Some(true);
            continue;
        }
        if failed {
            entry.succeeded = Some(false);
            return Ok(Some(StageDriveResult {
                step: ClusterStep::Stop,
                stuck: false,
            }));
        }

        let stuck = entry
            .started_transition_time
            .is_some_and(|t| elapsed(now, t) >= inputs.stuck_threshold);
        outcome.requeue_after = Some(Duration::from_secs(5));
        return Ok(Some(StageDriveResult {
            step: ClusterStep::Stop,
            stuck,
        }));
    }
    Ok(Some(StageDriveResult {
        step: ClusterStep::Continue,
        stuck: false,
    }))
}

fn handle_after_stage_tasks(
    stage: &mut Stage,
    now: Timestamp,
    outcome: &mut ExecutionOutcome,
    approval_requests: &[ApprovalRequest],
    run_name: &str,
) -> bool {
    let stage_started = stage
        .conditions
        .get(&StageConditionType::Progressing)
        .and_then(|c| c.last_transition_time)
        .unwrap_or(now);

    for (i, task) in stage.after_stage_tasks.clone().into_iter().enumerate() {
        match task {
            AfterStageTask::TimedWait { duration } => {
                if stage.task_conditions[i]
                    .get(&TaskConditionType::WaitTimeElapsed)
                    .is_some_and(|c| c.status.is_true())
                {
                    continue;
                }
                let waited = elapsed(now, stage_started);
                if waited < duration {
                    outcome.requeue_after = Some(duration - waited);
                    return false;
                }
                stage.task_conditions[i].set(Condition::new(
                    TaskConditionType::WaitTimeElapsed,
                    ConditionStatus::True,
                ));
            }
            AfterStageTask::Approval => {
                if stage.task_conditions[i]
                    .get(&TaskConditionType::ApprovalRequestApproved)
                    .is_some_and(|c| c.status.is_true())
                {
                    continue;
                }
                let existing = approval_requests
                    .iter()
                    .find(|r| r.update_run_name == run_name && r.stage_name == stage.name);
                match existing {
                    None => {
                        let request = ApprovalRequest {
                            name: format!("{run_name}-{}", stage.name),
                            update_run_name: run_name.to_string(),
                            stage_name: stage.name.clone(),
                            is_latest: true,
                            conditions: Default::default(),
                        };
                        outcome
                            .approval_request_ops
                            .push(ApprovalRequestOp::Create(request));
                        outcome.requeue_after = Some(Duration::from_secs(5));
                        return false;
                    }
                    Some(request) => {
                        if !stage.task_conditions[i]
                            .get(&TaskConditionType::ApprovalRequestCreated)
                            .is_some_and(|c| c.status.is_true())
                        {
                            stage.task_conditions[i].set(Condition::new(
                                TaskConditionType::ApprovalRequestCreated,
                                ConditionStatus::True,
                            ));
                        }
                        if request.is_approved() && !request.is_accepted() {
                            let mut accepted = request.clone();
                            accepted.conditions.set(Condition::new(
                                ApprovalRequestConditionType::ApprovalAccepted,
                                ConditionStatus::True,
                            ));
                            outcome
                                .approval_request_ops
                                .push(ApprovalRequestOp::Patch(accepted));
                        }
                        if request.is_accepted() {
                            stage.task_conditions[i].set(Condition::new(
                                TaskConditionType::ApprovalRequestApproved,
                                ConditionStatus::True,
                            ));
                        } else {
                            outcome.requeue_after = Some(Duration::from_secs(5));
                            return false;
                        }
                    }
                }
            }
        }
    }
    true
}

fn drive_deletion_stage(
    stage: &mut Stage,
    bindings_by_cluster: &HashMap<&str, &Binding>,
    now: Timestamp,
    outcome: &mut ExecutionOutcome,
) -> Result<(), Error> {
    for entry in &mut stage.clusters {
        let binding = bindings_by_cluster.get(entry.cluster_name.as_str()).copied();

        if entry.is_finished() {
            if binding.is_some() {
                return Err(DeletionInvariantViolatedSnafu {
                    cluster_name: entry.cluster_name.clone(),
                    detail: "binding still present after Succeeded=True".to_string(),
                }
                .build());
            }
            continue;
        }

        if entry.started {
            match binding {
                Some(b) if b.is_deleting() => {
                    outcome.requeue_after = Some(Duration::from_secs(5));
                    return Ok(());
                }
                Some(_) => {
                    return Err(DeletionInvariantViolatedSnafu {
                        cluster_name: entry.cluster_name.clone(),
                        detail: "started but binding carries no deletion timestamp".to_string(),
                    }
                    .build());
                }
                None => {
                    entry.succeeded = Some(true);
                    continue;
                }
            }
        }

        match binding {
            Some(b) => {
                outcome.binding_deletes.push(b.name.clone());
                entry.started = true;
                entry.started_transition_time = Some(now);
                outcome.requeue_after = Some(Duration::from_secs(1));
                return Ok(());
            }
            None => {
                entry.succeeded = Some(true);
                continue;
            }
        }
    }
    Ok(())
}

/// Advances `run` by at most one state transition. Returns `run: None` in the outcome if
/// the run was already terminal (a pure no-op).
#[instrument(skip_all, fields(run = %run.name))]
pub fn execute(
    run: &UpdateRun,
    inputs: &ExecutionInputs<'_>,
    now: Timestamp,
) -> Result<ExecutionOutcome, Error> {
    let mut outcome = ExecutionOutcome::default();
    if run.is_terminal() {
        return Ok(outcome);
    }

    let bindings_by_cluster: HashMap<&str, &Binding> = inputs
        .bindings
        .iter()
        .map(|b| (b.target_cluster.as_str(), b))
        .collect();

    let mut run = run.clone();
    let total_stages = run.stages.len();

    if run.current_stage_index < total_stages {
        let stage_name = run.stages[run.current_stage_index].name.clone();
        let stage = &mut run.stages[run.current_stage_index];
        if stage.conditions.get(&StageConditionType::Progressing).is_none() {
            stage.conditions.set_with_fresh_transition(
                Condition::new(StageConditionType::Progressing, ConditionStatus::True),
                now,
            );
        }

        let drive = drive_regular_stage(stage, &bindings_by_cluster, inputs, &run.name, now, &mut outcome)?;
        let Some(drive) = drive else {
            // Preemption: the in-flight cluster's binding no longer matches what the run
            // expects it to be.
            run.conditions.set_with_fresh_transition(
                Condition::new(UpdateRunConditionType::Progressing, ConditionStatus::False)
                    .with_reason(format!("{:?}", ProgressingReason::Failed))
                    .with_message(format!("stage {stage_name} preempted")),
                now,
            );
            run.conditions.set_with_fresh_transition(
                Condition::new(UpdateRunConditionType::Succeeded, ConditionStatus::False)
                    .with_message("preempted by a conflicting change to a binding"),
                now,
            );
            outcome.run = Some(run);
            return Ok(outcome);
        };

        if drive.stuck {
            run.conditions.set(
                Condition::new(UpdateRunConditionType::Progressing, ConditionStatus::True)
                    .with_reason(format!("{:?}", ProgressingReason::Stuck)),
            );
        }

        match drive.step {
            ClusterStep::Stop => {
                let entry_failed = run.stages[run.current_stage_index]
                    .clusters
                    .iter()
                    .any(|e| e.succeeded == Some(false));
                if entry_failed {
                    run.conditions.set_with_fresh_transition(
                        Condition::new(UpdateRunConditionType::Progressing, ConditionStatus::False)
                            .with_reason(format!("{:?}", ProgressingReason::Failed)),
                        now,
                    );
                    run.conditions.set_with_fresh_transition(
                        Condition::new(UpdateRunConditionType::Succeeded, ConditionStatus::False)
                            .with_message(format!("stage {stage_name} failed")),
                        now,
                    );
                }
                outcome.run = Some(run);
                return Ok(outcome);
            }
            ClusterStep::Continue => {
                let all_succeeded = run.stages[run.current_stage_index].all_clusters_succeeded();
                if !all_succeeded {
                    outcome.run = Some(run);
                    return Ok(outcome);
                }
                let stage = &mut run.stages[run.current_stage_index];
                let tasks_done = handle_after_stage_tasks(
                    stage,
                    now,
                    &mut outcome,
                    inputs.approval_requests,
                    &run.name,
                );
                if !tasks_done {
                    outcome.run = Some(run);
                    return Ok(outcome);
                }
                stage.conditions.set_with_fresh_transition(
                    Condition::new(StageConditionType::Succeeded, ConditionStatus::True),
                    now,
                );
                run.current_stage_index += 1;
                run.conditions.set(Condition::new(
                    UpdateRunConditionType::Progressing,
                    ConditionStatus::True,
                ).with_reason(format!("{:?}", ProgressingReason::Running)));
                outcome.requeue_after = Some(Duration::from_secs(1));
                outcome.run = Some(run);
                return Ok(outcome);
            }
        }
    }

    // Deletion stage.
    let mut deletion_stage = run.deletion_stage.clone().unwrap_or(Stage {
        name: "deletion".to_string(),
        clusters: vec![],
        after_stage_tasks: vec![],
        task_conditions: vec![],
        conditions: Default::default(),
    });
    if deletion_stage.clusters.is_empty() {
        deletion_stage.conditions.set(Condition::new(
            StageConditionType::Succeeded,
            ConditionStatus::True,
        ));
        run.deletion_stage = Some(deletion_stage);
        run.conditions.set_with_fresh_transition(
            Condition::new(UpdateRunConditionType::Succeeded, ConditionStatus::True),
            now,
        );
        run.conditions.set_with_fresh_transition(
            Condition::new(UpdateRunConditionType::Progressing, ConditionStatus::False)
                .with_reason("AllStagesSucceeded"),
            now,
        );
        outcome.run = Some(run);
        return Ok(outcome);
    }

    drive_deletion_stage(&mut deletion_stage, &bindings_by_cluster, now, &mut outcome)?;
    let finished = deletion_stage.all_clusters_succeeded();
    run.deletion_stage = Some(deletion_stage);
    if finished {
        if let Some(stage) = run.deletion_stage.as_mut() {
            stage.conditions.set_with_fresh_transition(
                Condition::new(StageConditionType::Succeeded, ConditionStatus::True),
                now,
            );
        }
        run.conditions.set_with_fresh_transition(
            Condition::new(UpdateRunConditionType::Succeeded, ConditionStatus::True),
            now,
        );
        run.conditions.set_with_fresh_transition(
            Condition::new(UpdateRunConditionType::Progressing, ConditionStatus::False)
                .with_reason("AllStagesSucceeded"),
            now,
        );
    }
    outcome.run = Some(run);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterDecision, OverrideRefs, Stage, StageClusterEntry};
    use crate::status::ConditionSet;

    fn binding(cluster: &str, state: BindingState) -> Binding {
        Binding {
            name: format!("p-{cluster}"),
            placement_name: "p".into(),
            target_cluster: cluster.into(),
            policy_snapshot_name: "p-1".into(),
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

    fn run_with_stage(clusters: &[&str]) -> UpdateRun {
        UpdateRun {
            name: "run-1".into(),
            placement_name: "p".into(),
            resource_snapshot_index: 0,
            strategy_snapshot_name: "s-1".into(),
            generation: 1,
            policy_index: Some(1),
            stages: vec![Stage {
                name: "stage-1".into(),
                clusters: clusters
                    .iter()
                    .map(|c| StageClusterEntry::pending(*c))
                    .collect(),
                after_stage_tasks: vec![],
                task_conditions: vec![],
                conditions: ConditionSet::new(),
            }],
            deletion_stage: Some(Stage {
                name: "deletion".into(),
                clusters: vec![],
                after_stage_tasks: vec![],
                task_conditions: vec![],
                conditions: ConditionSet::new(),
            }),
            current_stage_index: 0,
            conditions: Default::default(),
        }
    }

    #[test]
    fn starts_the_first_not_yet_started_cluster() {
        let run = run_with_stage(&["a", "b"]);
        let bindings = vec![binding("a", BindingState::Scheduled)];
        let inputs = ExecutionInputs {
            bindings: &bindings,
            resource_snapshot_name: "r-0",
            apply_strategy: &ApplyStrategy::default(),
            approval_requests: &[],
            stuck_threshold: Duration::from_secs(600),
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = execute(&run, &inputs, now).unwrap();
        assert_eq!(outcome.binding_patches.len(), 1);
        assert_eq!(outcome.binding_patches[0].target_cluster, "a");
        assert_eq!(outcome.binding_patches[0].state, BindingState::Bound);
        let updated = outcome.run.unwrap();
        assert!(updated.stages[0].clusters[0].started);
        assert!(!updated.stages[0].clusters[1].started);
    }

    #[test]
    fn does_not_advance_past_an_unready_cluster() {
        let mut run = run_with_stage(&["a"]);
        run.stages[0].clusters[0].started = true;
        run.stages[0].clusters[0].started_transition_time = Some(Timestamp::from_second(0).unwrap());
        let mut bound = binding("a", BindingState::Bound);
        bound.resource_snapshot_name = Some("r-0".into());
        let inputs = ExecutionInputs {
            bindings: std::slice::from_ref(&bound),
            resource_snapshot_name: "r-0",
            apply_strategy: &ApplyStrategy::default(),
            approval_requests: &[],
            stuck_threshold: Duration::from_secs(600),
        };
        let now = Timestamp::from_second(10).unwrap();
        let outcome = execute(&run, &inputs, now).unwrap();
        assert!(outcome.binding_patches.is_empty());
        assert!(outcome.binding_deletes.is_empty());
        let updated = outcome.run.unwrap();
        assert!(updated.stages[0].clusters[0].succeeded.is_none());
    }

    #[test]
    fn marks_cluster_succeeded_on_available_and_advances_run() {
        let run = run_with_stage(&["a"]);
        let mut available_run = run.clone();
        available_run.stages[0].clusters[0].started = true;
        available_run.stages[0].clusters[0].started_transition_time =
            Some(Timestamp::from_second(0).unwrap());

        let mut bound = binding("a", BindingState::Bound);
        bound.resource_snapshot_name = Some("r-0".into());
        bound.conditions.set(
            Condition::new(BindingConditionType::Available, ConditionStatus::True)
                .with_observed_generation(1),
        );
        let inputs = ExecutionInputs {
            bindings: std::slice::from_ref(&bound),
            resource_snapshot_name: "r-0",
            apply_strategy: &ApplyStrategy::default(),
            approval_requests: &[],
            stuck_threshold: Duration::from_secs(600),
        };
        let now = Timestamp::from_second(10).unwrap();
        let outcome = execute(&available_run, &inputs, now).unwrap();
        let updated = outcome.run.unwrap();
        assert!(updated.stages[0].clusters[0].is_finished());
        assert_eq!(updated.current_stage_index, 1);
    }

    #[test]
    fn deletes_bindings_in_the_deletion_stage() {
        let mut run = run_with_stage(&[]);
        run.current_stage_index = 1;
        run.deletion_stage = Some(Stage {
            name: "deletion".into(),
            clusters: vec![StageClusterEntry::pending("a")],
            after_stage_tasks: vec![],
            task_conditions: vec![],
            conditions: ConditionSet::new(),
        });
        let bound = binding("a", BindingState::Unscheduled);
        let inputs = ExecutionInputs {
            bindings: std::slice::from_ref(&bound),
            resource_snapshot_name: "r-0",
            apply_strategy: &ApplyStrategy::default(),
            approval_requests: &[],
            stuck_threshold: Duration::from_secs(600),
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = execute(&run, &inputs, now).unwrap();
        assert_eq!(outcome.binding_deletes, vec!["p-a".to_string()]);
    }

    #[test]
    fn completes_run_when_deletion_stage_is_empty() {
        let mut run = run_with_stage(&[]);
        run.current_stage_index = 1;
        let inputs = ExecutionInputs {
            bindings: &[],
            resource_snapshot_name: "r-0",
            apply_strategy: &ApplyStrategy::default(),
            approval_requests: &[],
            stuck_threshold: Duration::from_secs(600),
        };
        let now = Timestamp::from_second(0).unwrap();
        let outcome = execute(&run, &inputs, now).unwrap();
        let updated = outcome.run.unwrap();
        assert!(updated.is_terminal());
    }
}
