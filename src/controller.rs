//! The task controller: the public-facing owner of a [`Signal`].

use std::rc::Rc;

use crate::error::Result;
use crate::priority::Priority;
use crate::signal::Signal;

/// Options accepted by [`TaskController::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    pub priority: Option<Priority>,
}

/// Owns a [`Signal`] and is the only thing allowed to mutate its priority or
/// abort it. Tasks, and chained
/// [`crate::promise::PrioritizedFuture`]s, hold only the signal -- never the
/// controller itself -- so only the code that created the controller can
/// steer the work it backs.
pub struct TaskController {
    signal: Rc<Signal>,
}

impl TaskController {
    pub fn new(options: ControllerOptions) -> Self {
        let priority = options.priority.unwrap_or_default();
        Self { signal: Signal::new(Some(priority)) }
    }

    pub fn with_priority(priority: Priority) -> Self {
        Self::new(ControllerOptions { priority: Some(priority) })
    }

    /// The owned signal. Cloning this `Rc` is how the scheduler and chained
    /// futures observe the controller without owning it.
    pub fn signal(&self) -> Rc<Signal> {
        Rc::clone(&self.signal)
    }

    /// Reprioritizes every task and future currently associated with this
    /// controller's signal.
    ///
    /// # Errors
    /// See [`Signal::set_priority`].
    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        self.signal.set_priority(priority)
    }

    /// Aborts every task associated with this controller's signal that has
    /// not yet run.
    pub fn abort(&self, reason: impl Into<String>) {
        self.signal.abort(reason)
    }
}
