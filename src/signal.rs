//! Cancellation plus mutable-priority signal.
//!
//! A clean re-implementation of an abort-signal-with-priority should
//! *compose* rather than mutate a base abort signal's prototype. [`Signal`]
//! follows that: it owns its abort state and adds `priority`/
//! `prioritychange` as first-class fields rather than monkey-patching an
//! existing abort-signal type.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{Result, SchedulerError};
use crate::priority::Priority;

pub(crate) type ListenerId = u64;

struct PriorityChangeListener {
    id: ListenerId,
    callback: Box<dyn FnMut(Priority, Priority)>,
}

/// A cancellation-capable object that may additionally carry a mutable
/// priority. Only a [`crate::controller::TaskController`] may abort it or
/// change its priority; everyone else observes it.
pub struct Signal {
    aborted: Cell<bool>,
    reason: RefCell<Option<String>>,
    priority: Cell<Option<Priority>>,
    priority_listeners: RefCell<Vec<PriorityChangeListener>>,
    abort_listeners: RefCell<Vec<(ListenerId, Box<dyn FnOnce(&str)>)>>,
    next_listener_id: Cell<ListenerId>,
    /// Guards against `set_priority` being invoked re-entrantly from one of
    /// `priority_listeners`'s own callbacks.
    dispatching: Cell<bool>,
}

impl Signal {
    pub(crate) fn new(priority: Option<Priority>) -> Rc<Self> {
        Rc::new(Self {
            aborted: Cell::new(false),
            reason: RefCell::new(None),
            priority: Cell::new(priority),
            priority_listeners: RefCell::new(Vec::new()),
            abort_listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
            dispatching: Cell::new(false),
        })
    }

    pub fn aborted(&self) -> bool {
        self.aborted.get()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.borrow().clone()
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority.get()
    }

    /// Registers a single-shot abort listener, returning its id so it can be
    /// detached once no longer needed.
    pub(crate) fn on_abort_once(&self, listener: impl FnOnce(&str) + 'static) -> ListenerId {
        let id = self.next_listener_id.get();
        self.next_listener_id.set(id + 1);
        self.abort_listeners.borrow_mut().push((id, Box::new(listener)));
        id
    }

    pub(crate) fn remove_abort_listener(&self, id: ListenerId) {
        self.abort_listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }

    /// Registers a `prioritychange` listener, returning its id.
    pub(crate) fn on_priority_change(&self, listener: impl FnMut(Priority, Priority) + 'static) -> ListenerId {
        let id = self.next_listener_id.get();
        self.next_listener_id.set(id + 1);
        self.priority_listeners
            .borrow_mut()
            .push(PriorityChangeListener { id, callback: Box::new(listener) });
        id
    }

    /// Aborts the signal with `reason`, firing every registered abort
    /// listener exactly once. Idempotent: aborting an already-aborted
    /// signal has no effect.
    pub fn abort(&self, reason: impl Into<String>) {
        if self.aborted.get() {
            return;
        }
        let reason = reason.into();
        self.aborted.set(true);
        *self.reason.borrow_mut() = Some(reason.clone());

        let listeners = std::mem::take(&mut *self.abort_listeners.borrow_mut());
        for (_, listener) in listeners {
            listener(&reason);
        }
    }

    /// Sets the signal's priority, dispatching `prioritychange` to every
    /// listener unless the priority is unchanged.
    ///
    /// # Errors
    /// Returns [`SchedulerError::DisallowedOperation`] if called re-entrantly
    /// from within a `prioritychange` listener.
    pub fn set_priority(&self, new: Priority) -> Result<()> {
        if self.dispatching.get() {
            return Err(SchedulerError::DisallowedOperation);
        }

        let previous = self.priority.get().unwrap_or_default();
        if previous == new {
            return Ok(());
        }

        self.priority.set(Some(new));
        self.dispatching.set(true);
        {
            let mut listeners = self.priority_listeners.borrow_mut();
            for listener in listeners.iter_mut() {
                (listener.callback)(previous, new);
            }
        }
        self.dispatching.set(false);

        Ok(())
    }
}
