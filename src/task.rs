//! The task record: the unit of work linked into the scheduler's queues.

use std::cell::Cell;
use std::rc::Rc;

use intrusive_collections::LinkedListLink;

use crate::host::HostCallback;
use crate::priority::Priority;
use crate::signal::{ListenerId, Signal};

/// The value a scheduled callback produces. Errors are plain messages,
/// matching this crate's convention of normalizing callback failures to a
/// string at the task boundary (mirrored by [`crate::error::TaskError::CallbackFailed`]).
pub type TaskResult<T> = std::result::Result<T, String>;

/// Whether a task was submitted via `yield_task` (a continuation) or via
/// `post_task` (fresh work). Continuations dispatch before fresh tasks at
/// the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Continuation,
    Fresh,
}

impl TaskKind {
    pub(crate) fn index(self) -> usize {
        match self {
            TaskKind::Continuation => 0,
            TaskKind::Fresh => 1,
        }
    }
}

/// Globally unique, strictly increasing sequence-id generator shared by
/// every queue in a [`crate::scheduler::Scheduler`] (`merge` preserves
/// relative sequence-id order).
#[derive(Debug, Default)]
pub(crate) struct SequenceCounter(Cell<u64>);

impl SequenceCounter {
    pub(crate) fn new() -> Self {
        Self(Cell::new(0))
    }

    pub(crate) fn next(&self) -> u64 {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }
}

/// A submitted unit of work, linked into exactly one of the scheduler's
/// priority queues at a time.
///
/// `run` is a type-erased thunk that invokes the caller's callback and
/// settles the caller's [`crate::promise::PrioritizedFuture`] -- the queue
/// and scheduler never need to know the callback's return type.
pub(crate) struct TaskRecord {
    pub(crate) link: LinkedListLink,
    pub(crate) sequence_id: Cell<u64>,
    pub(crate) kind: TaskKind,
    /// Explicit `options.priority`, if supplied. Overrides the signal's
    /// priority for this task only.
    pub(crate) explicit_priority: Option<Priority>,
    pub(crate) signal: Option<Rc<Signal>>,
    /// Host callback backing this task's delay, if it was submitted with
    /// one. Cleared once the delay elapses or the task aborts first.
    pub(crate) delay_callback: Cell<Option<HostCallback>>,
    pub(crate) abort_listener: Cell<Option<ListenerId>>,
    pub(crate) run: Cell<Option<Box<dyn FnOnce()>>>,
}

intrusive_collections::intrusive_adapter!(
    pub(crate) TaskAdapter = Rc<TaskRecord>: TaskRecord { link: LinkedListLink }
);

impl TaskRecord {
    pub(crate) fn new(kind: TaskKind, explicit_priority: Option<Priority>, signal: Option<Rc<Signal>>) -> Self {
        Self {
            link: LinkedListLink::new(),
            sequence_id: Cell::new(0),
            kind,
            explicit_priority,
            signal,
            delay_callback: Cell::new(None),
            abort_listener: Cell::new(None),
            run: Cell::new(None),
        }
    }

    /// Resolves this task's priority: explicit option, else the signal's
    /// priority, else `default`.
    pub(crate) fn effective_priority(&self, default: Priority) -> Priority {
        self.explicit_priority
            .or_else(|| self.signal.as_ref().and_then(|s| s.priority()))
            .unwrap_or(default)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.signal.as_ref().map(|s| s.aborted()).unwrap_or(false)
    }
}
