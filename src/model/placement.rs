use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::status::ConditionSet;

/// `applyStrategy.type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
    serde::Serialize, serde::Deserialize,
)]
pub enum ApplyStrategyType {
    ClientSideApply,
    ServerSideApply,
    ReportDiff,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
    serde::Serialize, serde::Deserialize,
)]
pub enum ComparisonOption {
    PartialComparison,
    FullComparison,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
    serde::Serialize, serde::Deserialize,
)]
pub enum WhenToApply {
    Always,
    IfNotDrifted,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
    serde::Serialize, serde::Deserialize,
)]
pub enum WhenToTakeOver {
    Always,
    IfNoDiff,
}

/// `applyStrategy.serverSideApplyConfig`, only meaningful when `type == ServerSideApply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ServerSideApplyConfig {
    pub force_conflicts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApplyStrategy {
    pub type_: ApplyStrategyType,
    pub comparison_option: ComparisonOption,
    pub when_to_apply: WhenToApply,
    pub when_to_take_over: WhenToTakeOver,
    pub server_side_apply: Option<ServerSideApplyConfig>,
}

impl Default for ApplyStrategy {
    /// The defaulted value synthesized when a Placement has no apply strategy set.
    fn default() -> Self {
        Self {
            type_: ApplyStrategyType::ClientSideApply,
            comparison_option: ComparisonOption::PartialComparison,
            when_to_apply: WhenToApply::Always,
            when_to_take_over: WhenToTakeOver::Always,
            server_side_apply: None,
        }
    }
}

/// Rolling-update envelope parameters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollingUpdateConfig {
    pub max_unavailable: IntOrString,
    pub max_surge: IntOrString,
    pub unavailable_period_seconds: u32,
}

impl Default for RollingUpdateConfig {
    fn default() -> Self {
        Self {
            max_unavailable: IntOrString::Int(1),
            max_surge: IntOrString::Int(1),
            unavailable_period_seconds: 60,
        }
    }
}

/// `rolloutStrategy.type`. `External` hands rollout off to a staged update runner.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutStrategy {
    RollingUpdate(RollingUpdateConfig),
    External,
}

impl RolloutStrategy {
    pub fn is_external(&self) -> bool {
        matches!(self, RolloutStrategy::External)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum PlacementConditionType {
    RolloutStarted,
    Overridden,
    WorkCreated,
    Applied,
    Available,
}

impl PlacementConditionType {
    /// The five sequential stages in evaluation order.
    pub const STAGES: [PlacementConditionType; 5] = [
        PlacementConditionType::RolloutStarted,
        PlacementConditionType::Overridden,
        PlacementConditionType::WorkCreated,
        PlacementConditionType::Applied,
        PlacementConditionType::Available,
    ];
}

/// A declarative object asking that a set of resources be propagated to a chosen subset
/// of clusters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Placement {
    pub name: String,
    pub resource_selectors: Vec<String>,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub apply_strategy: Option<ApplyStrategy>,
    pub revision_history_limit: u32,
    pub generation: i64,
    pub conditions: ConditionSet<PlacementConditionType>,
}

impl Placement {
    pub fn effective_apply_strategy(&self) -> ApplyStrategy {
        self.apply_strategy.clone().unwrap_or_default()
    }
}
