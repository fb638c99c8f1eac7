//! Error taxonomy shared by the scheduler, rollout controller and staged update runner.
//!
//! Each module defines its own small `snafu`-derived error enum for the errors it can
//! produce (see `scheduler::Error`, `rollout::Error`, `staged_update::Error`). This module
//! only carries the three-way classification every concern-local error implements so that
//! a reconcile loop can decide whether to retry, requeue, or latch a condition reason
//! without needing a single crate-wide error type.

/// The three error kinds distinguished system-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caused by an unresolvable input. Terminal for the current operation; surfaced on the
    /// owning object's condition with a stable reason; does not retry in-band.
    UserError,

    /// An internal invariant violation. Terminal for the current operation; surfaced and
    /// logged; typically indicates upstream corruption and requires manual repair.
    UnexpectedBehavior,

    /// External-store conflicts, not-found on a referent that may still appear, timeouts.
    /// Retried with backoff; never latched into a condition's reason.
    Transient,
}

impl ErrorClass {
    /// Whether a reconcile loop should requeue this error for another attempt.
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Implemented by every module-local error enum so that callers can classify without a
/// crate-wide error type.
pub trait ErrorClassify {
    fn class(&self) -> ErrorClass;
}
