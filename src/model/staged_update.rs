use std::time::Duration;

use crate::label_selector::LabelSelector;
use crate::status::ConditionSet;

/// An after-stage task: either a timed wait or a human approval gate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AfterStageTask {
    TimedWait { duration: Duration },
    Approval,
}

impl AfterStageTask {
    pub fn type_name(&self) -> &'static str {
        match self {
            AfterStageTask::TimedWait { .. } => "TimedWait",
            AfterStageTask::Approval => "Approval",
        }
    }

    /// Builds a `TimedWait` task from a human-readable duration string (`"30s"`,
    /// `"10m"`, `"2h"`), the format a strategy snapshot's stage spec carries it in at
    /// the config boundary.
    pub fn timed_wait(duration: &str) -> Result<Self, humantime::DurationError> {
        Ok(AfterStageTask::TimedWait {
            duration: humantime::parse_duration(duration)?,
        })
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskConditionType {
    WaitTimeElapsed,
    ApprovalRequestCreated,
    ApprovalRequestApproved,
}

/// A stage definition as frozen in the strategy snapshot: a label selector, an optional
/// sort-key label, and an ordered list of after-stage tasks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub label_selector: LabelSelector,
    pub sort_label_key: Option<String>,
    pub after_stage_tasks: Vec<AfterStageTask>,
}

/// A frozen sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StrategySnapshot {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StageConditionType {
    Progressing,
    Succeeded,
}

/// Per-cluster status within a computed stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StageClusterEntry {
    pub cluster_name: String,
    pub started: bool,
    pub started_transition_time: Option<jiff::Timestamp>,
    pub succeeded: Option<bool>,
    pub cluster_scoped_override_refs: Vec<String>,
    pub namespaced_override_refs: Vec<String>,
}

impl StageClusterEntry {
    pub fn pending(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            started: false,
            started_transition_time: None,
            succeeded: None,
            cluster_scoped_override_refs: Vec::new(),
            namespaced_override_refs: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.succeeded == Some(true)
    }
}

/// A computed stage: the stage spec plus live per-cluster progress.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stage {
    pub name: String,
    pub clusters: Vec<StageClusterEntry>,
    pub after_stage_tasks: Vec<AfterStageTask>,
    pub task_conditions: Vec<ConditionSet<TaskConditionType>>,
    pub conditions: ConditionSet<StageConditionType>,
}

impl Stage {
    pub fn all_clusters_succeeded(&self) -> bool {
        self.clusters.iter().all(StageClusterEntry::is_finished)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpdateRunConditionType {
    Initialized,
    Progressing,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProgressingReason {
    Running,
    Waiting,
    Stuck,
    Failed,
}

/// An update run resource driving bindings cluster-by-cluster through stages.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpdateRun {
    pub name: String,
    pub placement_name: String,
    pub resource_snapshot_index: u64,
    pub strategy_snapshot_name: String,
    pub generation: i64,

    /// Populated by initialization; `None` before `Initialized=True`.
    pub policy_index: Option<u64>,
    pub stages: Vec<Stage>,
    pub deletion_stage: Option<Stage>,
    /// Index into `stages`; `stages.len()` means the deletion stage is current.
    pub current_stage_index: usize,

    pub conditions: ConditionSet<UpdateRunConditionType>,
}

impl UpdateRun {
    pub fn is_initialized(&self) -> bool {
        self.conditions
            .get(&UpdateRunConditionType::Initialized)
            .is_some_and(|c| c.status.is_true())
    }

    pub fn is_terminal(&self) -> bool {
        self.conditions
            .get(&UpdateRunConditionType::Succeeded)
            .is_some_and(|c| c.status.is_true() || c.status.is_false())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ApprovalRequestConditionType {
    Approved,
    ApprovalAccepted,
}

/// Scoped to (update run, stage).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApprovalRequest {
    pub name: String,
    pub update_run_name: String,
    pub stage_name: String,
    pub is_latest: bool,
    pub conditions: ConditionSet<ApprovalRequestConditionType>,
}

impl ApprovalRequest {
    pub fn is_approved(&self) -> bool {
        self.conditions
            .get(&ApprovalRequestConditionType::Approved)
            .is_some_and(|c| c.status.is_true())
    }

    pub fn is_accepted(&self) -> bool {
        self.conditions
            .get(&ApprovalRequestConditionType::ApprovalAccepted)
            .is_some_and(|c| c.status.is_true())
    }
}
