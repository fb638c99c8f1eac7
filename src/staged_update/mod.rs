//! The staged update runner: drives a Placement whose rollout strategy is `External`
//! through a user-defined sequence of label-selected cluster cohorts, one cluster at a
//! time, gated by timed waits and human approvals.
//!
//! [`initialize`] computes the run's stage list once, idempotently. [`execute`] is called
//! on every reconcile and makes at most one state transition (or schedules a retry),
//! reconstructing progress entirely from the run's durable fields — the runner keeps no
//! in-memory state between calls.

mod execution;
mod init;

pub use execution::{execute, ExecutionInputs, ExecutionOutcome};
pub use init::{initialize, InitializationInputs};

use snafu::Snafu;

use crate::error::{ErrorClass, ErrorClassify};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("placement {name:?} does not use the External rollout strategy"))]
    NotExternalStrategy { name: String },

    #[snafu(display("latest policy snapshot {name:?} is not Scheduled=True at its current generation"))]
    PolicySnapshotNotScheduled { name: String },

    #[snafu(display("binding for cluster {cluster_name:?} references a stale policy snapshot but is not Unscheduled"))]
    StaleBindingPolicySnapshot { cluster_name: String },

    #[snafu(display("selected binding count does not match the policy's observed cluster count"))]
    ObservedCountMismatch,

    #[snafu(display("no master resource snapshot found for index {index}"))]
    ResourceSnapshotNotFound { index: u64 },

    #[snafu(display("stage {stage:?} declares two after-stage tasks of the same type"))]
    DuplicateAfterStageTaskType { stage: String },

    #[snafu(display("stage {stage:?} declares a TimedWait with a non-positive duration"))]
    NonPositiveTimedWaitDuration { stage: String },

    #[snafu(display("cluster {cluster_name:?} is selected by more than one stage"))]
    DuplicateClusterAcrossStages { cluster_name: String },

    #[snafu(display("no binding found for cluster {cluster_name:?} in the current stage"))]
    MissingBinding { cluster_name: String },

    #[snafu(display(
        "deletion-stage invariant violated for cluster {cluster_name:?}: {detail}"
    ))]
    DeletionInvariantViolated { cluster_name: String, detail: String },
}

impl ErrorClassify for Error {
    fn class(&self) -> ErrorClass {
        match self {
            Error::NotExternalStrategy { .. } | Error::PolicySnapshotNotScheduled { .. } => {
                ErrorClass::UserError
            }
            Error::DuplicateAfterStageTaskType { .. }
            | Error::NonPositiveTimedWaitDuration { .. }
            | Error::DuplicateClusterAcrossStages { .. } => ErrorClass::UserError,
            Error::StaleBindingPolicySnapshot { .. }
            | Error::ObservedCountMismatch
            | Error::ResourceSnapshotNotFound { .. } => ErrorClass::Transient,
            Error::MissingBinding { .. } | Error::DeletionInvariantViolated { .. } => {
                ErrorClass::UnexpectedBehavior
            }
        }
    }
}
