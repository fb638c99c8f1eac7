//! The data model: entities flow leaf-first from member cluster inventory through policy
//! and resource snapshots into bindings, with staged update runs as an optional overlay.
//!
//! Cyclic references between a [`Placement`] and its snapshots/bindings are resolved by
//! name lookup through a [`crate::store::Store`], not by pointers: each entity stores the
//! other's name as a plain `String`.

mod binding;
mod cluster;
mod keyed;
mod placement;
mod policy;
mod resource;
mod staged_update;
mod work;

pub use binding::{
    deterministic_binding_name, Binding, BindingConditionType, BindingState, ClusterDecision,
    ClusterScore, OverrideRefs, ScoredCluster,
};
pub use cluster::{
    ClusterTaint, Eligibility, EligibilityChecker, MemberCluster, TaintEffect, TolerationMatch,
    Toleration, toleration_matches,
};
pub use placement::{
    ApplyStrategy, ApplyStrategyType, ComparisonOption, Placement, PlacementConditionType,
    RollingUpdateConfig, RolloutStrategy, ServerSideApplyConfig, WhenToApply, WhenToTakeOver,
};
pub use policy::{
    AffinityTerm, Policy, PolicyAffinity, PolicyConditionType, PolicySnapshot,
    TopologySpreadConstraint, WeightedAffinityTerm, WhenUnsatisfiable,
};
pub use resource::ResourceSnapshot;
pub use staged_update::{
    AfterStageTask, ApprovalRequest, ApprovalRequestConditionType, ProgressingReason, Stage,
    StageClusterEntry, StageConditionType, StageSpec, StrategySnapshot, TaskConditionType,
    UpdateRun, UpdateRunConditionType,
};
pub use work::{WorkConditionType, WorkObjectStatus, NOT_TRACKABLE_REASON};
pub use keyed::{
    LABEL_IS_LATEST_SNAPSHOT, LABEL_IS_LATEST_UPDATE_RUN_APPROVAL, LABEL_PLACEMENT_TRACKING,
    LABEL_POLICY_INDEX, LABEL_RESOURCE_INDEX, LABEL_TARGET_UPDATE_RUN,
    LABEL_TARGET_UPDATING_STAGE_NAME,
};

/// A monotonically-issued integer encoded as a string label.
pub type Revision = u64;
