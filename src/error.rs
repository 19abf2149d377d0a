//! Scheduler and settlement error types.
//!
//! [`SchedulerError`] covers conditions raised synchronously from the call
//! that detected them. [`TaskError`] is never raised synchronously -- it is
//! only ever delivered by resolving or rejecting a
//! [`crate::promise::PrioritizedFuture`].

/// Errors raised synchronously by scheduler and controller APIs.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    // -- Submission errors ----------------------------------------------
    /// A caller-supplied priority tag (e.g. read from external
    /// configuration) is not one of the three known tags. Returned by
    /// [`crate::scheduler::TaskOptions::with_priority_tag`]; never raised
    /// for a `Priority` value constructed directly, since that type has no
    /// invalid states.
    #[error("invalid scheduler input: {0}")]
    TypeViolation(String),

    /// `set_priority` was invoked re-entrantly from one of the signal's own
    /// `prioritychange` listeners.
    #[error("setPriority called re-entrantly from a prioritychange listener")]
    DisallowedOperation,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// The outcome surfaced through a task's
/// [`crate::promise::PrioritizedFuture`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The task's signal aborted before its callback ran. Carries the
    /// signal's stated reason, forwarded unchanged.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// The callback ran and returned an error, which propagates unchanged.
    #[error("task callback failed: {0}")]
    CallbackFailed(String),

    /// The callback panicked. The dispatch loop itself never fails; a
    /// panicking callback is caught so it cannot unwind across a dispatch
    /// tick and is turned into this variant instead.
    #[error("task callback panicked: {0}")]
    Panicked(String),
}
