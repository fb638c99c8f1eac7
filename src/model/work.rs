use crate::status::ConditionSet;

/// The reason string that marks an `Available` condition as "not trackable but succeeded":
/// the work applier could not determine live availability (e.g. the manifest has no
/// well-known readiness signal) but reports the apply itself succeeded. Binding readiness
/// treats this the same as a true positive once past the `unavailablePeriodSeconds`
/// grace window.
pub const NOT_TRACKABLE_REASON: &str = "NotTrackableButSucceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WorkConditionType {
    Applied,
    Available,
    DiffReported,
}

/// One work object's status as reported by the external work applier.
/// The core reads only enough of this to roll it up into the owning binding's aggregate
/// conditions; it never inspects per-manifest diff/apply detail beyond that.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkObjectStatus {
    pub name: String,
    pub observed_generation: i64,
    pub conditions: ConditionSet<WorkConditionType>,
}
