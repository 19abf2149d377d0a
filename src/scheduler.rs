//! The dispatch core: priority-partitioned queues, the weak signal
//! registry, and the single pending host callback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{SchedulerError, TaskError};
use crate::host::HostDriver;
use crate::priority::Priority;
use crate::promise::PrioritizedFuture;
use crate::queue::Queue;
use crate::signal::Signal;
use crate::task::{SequenceCounter, TaskKind, TaskRecord, TaskResult};

/// Options accepted by [`Scheduler::post_task`].
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub priority: Option<Priority>,
    pub signal: Option<Rc<Signal>>,
    pub delay: Duration,
}

impl TaskOptions {
    /// Sets this task's priority from a caller-supplied string tag, e.g. one
    /// read from external configuration rather than chosen in Rust code.
    ///
    /// # Errors
    /// Returns [`SchedulerError::TypeViolation`] for anything other than
    /// `"user-blocking"`, `"user-visible"`, or `"background"`.
    pub fn with_priority_tag(mut self, tag: &str) -> crate::error::Result<Self> {
        self.priority = Some(
            Priority::parse(tag).ok_or_else(|| SchedulerError::TypeViolation(format!("unknown priority tag: {tag:?}")))?,
        );
        Ok(self)
    }
}

/// Static configuration for a [`Scheduler`] instance.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Priority used when neither an explicit priority nor a signal
    /// priority is supplied.
    pub default_priority: Priority,
    pub idle_available: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { default_priority: Priority::default(), idle_available: true }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

/// Builder for [`SchedulerConfig`], following this crate's preference for
/// explicit constructors over a partially-initialized struct literal.
#[derive(Default)]
pub struct SchedulerConfigBuilder {
    default_priority: Option<Priority>,
    idle_available: Option<bool>,
}

impl SchedulerConfigBuilder {
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = Some(priority);
        self
    }

    pub fn idle_available(mut self, available: bool) -> Self {
        self.idle_available = Some(available);
        self
    }

    pub fn build(self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            default_priority: self.default_priority.unwrap_or(defaults.default_priority),
            idle_available: self.idle_available.unwrap_or(defaults.idle_available),
        }
    }
}

/// Pointer-identity key for the weak signal registry.
struct SignalKey(*const ());

impl SignalKey {
    fn of(signal: &Weak<Signal>) -> Self {
        SignalKey(signal.as_ptr() as *const ())
    }
}

impl PartialEq for SignalKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SignalKey {}
impl std::hash::Hash for SignalKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

/// `[continuation queue, fresh queue]` for one priority.
struct QueueSet {
    lanes: [Queue; 2],
}

impl QueueSet {
    fn new() -> Self {
        Self { lanes: [Queue::new(), Queue::new()] }
    }

    fn lane(&mut self, kind: TaskKind) -> &mut Queue {
        &mut self.lanes[kind.index()]
    }

    fn is_empty(&self) -> bool {
        self.lanes[0].is_empty() && self.lanes[1].is_empty()
    }
}

fn borrow_two_mut(sets: &mut [QueueSet; 3], i: usize, j: usize) -> (&mut QueueSet, &mut QueueSet) {
    assert_ne!(i, j, "migration is always between two distinct priorities");
    if i < j {
        let (left, right) = sets.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = sets.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}

struct Inner {
    config: SchedulerConfig,
    driver: Rc<dyn HostDriver>,
    queues: RefCell<[QueueSet; 3]>,
    sequence: SequenceCounter,
    pending: RefCell<Option<crate::host::HostCallback>>,
    /// Weak registry of signals already subscribed for priority-change
    /// migration. Pruned lazily as it's walked.
    registered_signals: RefCell<HashMap<SignalKey, (Weak<Signal>, Priority)>>,
}

/// A cooperative, priority-aware, single-threaded task scheduler.
///
/// `Scheduler` is intentionally `!Send`/`!Sync`: every state mutation is
/// expected to happen on one host thread. Clone it (cheap `Rc` clone) to
/// share a handle across async tasks on that same thread; never move it
/// across an OS thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

fn settle<V>(slot: &Rc<RefCell<Option<tokio::sync::oneshot::Sender<V>>>>, value: V) {
    if let Some(tx) = slot.borrow_mut().take() {
        let _ = tx.send(value);
    }
}

fn run_callback<T>(callback: impl FnOnce() -> TaskResult<T>) -> std::result::Result<T, TaskError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(TaskError::CallbackFailed(message)),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task callback panicked with a non-string payload".to_string()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, driver: Rc<dyn HostDriver>) -> Self {
        let queues = [QueueSet::new(), QueueSet::new(), QueueSet::new()];
        Self {
            inner: Rc::new(Inner {
                config,
                driver,
                queues: RefCell::new(queues),
                sequence: SequenceCounter::new(),
                pending: RefCell::new(None),
                registered_signals: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    /// Submits `callback` for execution, returning a future that settles
    /// with its result.
    pub fn post_task<T: 'static>(
        &self,
        options: TaskOptions,
        callback: impl FnOnce() -> TaskResult<T> + 'static,
    ) -> PrioritizedFuture<T> {
        self.submit(TaskKind::Fresh, options, callback)
    }

    /// Submits an empty continuation at `priority` (default: the
    /// scheduler's configured default), which dispatches ahead of fresh
    /// tasks at the same priority.
    pub fn yield_task(&self, priority: Option<Priority>) -> PrioritizedFuture<()> {
        let options = TaskOptions { priority, ..Default::default() };
        self.submit(TaskKind::Continuation, options, || Ok(()))
    }

    fn submit<T: 'static>(
        &self,
        kind: TaskKind,
        options: TaskOptions,
        callback: impl FnOnce() -> TaskResult<T> + 'static,
    ) -> PrioritizedFuture<T> {
        let (tx, rx) = tokio::sync::oneshot::channel::<std::result::Result<T, TaskError>>();
        let tx_slot = Rc::new(RefCell::new(Some(tx)));

        // A signal already aborted at submission time rejects immediately,
        // without ever being enqueued.
        if let Some(signal) = &options.signal {
            if signal.aborted() {
                let reason = signal.reason().unwrap_or_default();
                settle(&tx_slot, Err(TaskError::Cancelled(reason)));
                return PrioritizedFuture::new(rx, options.signal.clone());
            }
        }

        let record = Rc::new(TaskRecord::new(kind, options.priority, options.signal.clone()));

        {
            let tx_slot = Rc::clone(&tx_slot);
            record.run.set(Some(Box::new(move || {
                let outcome = run_callback(callback);
                settle(&tx_slot, outcome);
            })));
        }

        // Registering a single-shot abort listener does not unlink an
        // already-queued record from its queue -- that's the lazy-skip
        // decision documented on `Queue::remove` and in DESIGN.md; `run_one`
        // is what actually discards it, once it reaches the head.
        if let Some(signal) = &options.signal {
            let record_weak = Rc::downgrade(&record);
            let tx_slot = Rc::clone(&tx_slot);
            let listener_id = signal.on_abort_once(move |reason| {
                if let Some(task) = record_weak.upgrade() {
                    if let Some(cb) = task.delay_callback.take() {
                        cb.cancel();
                    }
                }
                settle(&tx_slot, Err(TaskError::Cancelled(reason.to_string())));
            });
            record.abort_listener.set(Some(listener_id));
            self.ensure_registered(signal);
        }

        let future = PrioritizedFuture::new(rx, options.signal.clone());

        if options.delay > Duration::ZERO {
            self.arm_delay(record, options.delay);
        } else {
            self.enqueue(record);
            self.arm_if_needed();
        }

        future
    }

    fn enqueue(&self, record: Rc<TaskRecord>) {
        let priority = record.effective_priority(self.inner.config.default_priority);
        trace!(?priority, "enqueue task");
        let mut queues = self.inner.queues.borrow_mut();
        queues[priority.index()].lane(record.kind).push(&self.inner.sequence, record);
    }

    fn arm_delay(&self, record: Rc<TaskRecord>, delay: Duration) {
        let priority = record.effective_priority(self.inner.config.default_priority);
        let scheduler = self.clone();
        let record_for_timer = Rc::clone(&record);
        let callback = self.inner.driver.schedule(
            priority,
            delay,
            Box::new(move || {
                record_for_timer.delay_callback.take();
                scheduler.enqueue(Rc::clone(&record_for_timer));
                scheduler.cancel_pending_host_callback();
                scheduler.dispatch_tick();
            }),
        );
        record.delay_callback.set(Some(callback));
    }

    fn cancel_pending_host_callback(&self) {
        if let Some(callback) = self.inner.pending.borrow_mut().take() {
            callback.cancel();
        }
    }

    /// Runs exactly one task (if any are ready) and re-arms the pending
    /// host callback if any queue remains non-empty.
    fn dispatch_tick(&self) {
        self.inner.pending.borrow_mut().take();
        self.run_one();
        self.arm_if_needed();
    }

    fn highest_nonempty_priority(&self) -> Option<Priority> {
        let queues = self.inner.queues.borrow();
        Priority::ALL.into_iter().find(|p| !queues[p.index()].is_empty())
    }

    /// Arms (or re-uses) the single pending host callback: a too-lazy idle
    /// callback is cancelled and replaced once higher-priority work arrives.
    fn arm_if_needed(&self) {
        let Some(priority) = self.highest_nonempty_priority() else { return };

        let mut pending = self.inner.pending.borrow_mut();
        if let Some(existing) = pending.as_ref() {
            if existing.is_idle_callback() && priority != Priority::Background {
                let stale = pending.take().unwrap();
                stale.cancel();
            }
        }

        if pending.is_none() {
            let scheduler = self.clone();
            let callback = self.inner.driver.schedule(
                priority,
                Duration::ZERO,
                Box::new(move || scheduler.dispatch_tick()),
            );
            *pending = Some(callback);
        }
    }

    fn pop_highest(&self) -> Option<Rc<TaskRecord>> {
        let mut queues = self.inner.queues.borrow_mut();
        for priority in Priority::ALL {
            for kind in [TaskKind::Continuation, TaskKind::Fresh] {
                if let Some(task) = queues[priority.index()].lane(kind).take_next() {
                    return Some(task);
                }
            }
        }
        None
    }

    /// Scans priorities highest to lowest, continuations before fresh
    /// tasks, skipping (but not eagerly removing) records whose signal
    /// already aborted, and invokes the first runnable task synchronously.
    /// Returns whether a task ran.
    fn run_one(&self) -> bool {
        loop {
            let Some(record) = self.pop_highest() else { return false };

            if record.is_aborted() {
                trace!("discarding aborted task found at dispatch");
                continue;
            }

            if let Some(id) = record.abort_listener.take() {
                if let Some(signal) = &record.signal {
                    signal.remove_abort_listener(id);
                }
            }

            if let Some(run) = record.run.take() {
                debug!("running task");
                run();
            }
            return true;
        }
    }

    fn prune_dead_signals(&self, registry: &mut HashMap<SignalKey, (Weak<Signal>, Priority)>) {
        registry.retain(|_, (weak, _)| weak.strong_count() > 0);
    }

    /// Subscribes `signal` for priority-change migration the first time it
    /// is seen.
    fn ensure_registered(&self, signal: &Rc<Signal>) {
        let weak = Rc::downgrade(signal);
        let key = SignalKey::of(&weak);

        let mut registry = self.inner.registered_signals.borrow_mut();
        self.prune_dead_signals(&mut registry);

        if registry.contains_key(&key) {
            return;
        }
        let Some(priority) = signal.priority() else { return };
        registry.insert(key, (weak, priority));
        drop(registry);

        let weak_signal = Rc::downgrade(signal);
        let weak_inner = Rc::downgrade(&self.inner);
        signal.on_priority_change(move |old, new| {
            let (Some(inner), Some(signal)) = (weak_inner.upgrade(), weak_signal.upgrade()) else { return };
            let scheduler = Scheduler { inner };
            scheduler.migrate(&signal, old, new);
            scheduler.update_registered_priority(&signal, new);
            scheduler.arm_if_needed();
        });
    }

    fn update_registered_priority(&self, signal: &Rc<Signal>, new: Priority) {
        let key = SignalKey::of(&Rc::downgrade(signal));
        if let Some(entry) = self.inner.registered_signals.borrow_mut().get_mut(&key) {
            entry.1 = new;
        }
    }

    /// Moves every queued task (both continuation and fresh lanes) whose
    /// signal is `signal` from the `old` priority's queues to `new`'s,
    /// preserving relative sequence-id order.
    fn migrate(&self, signal: &Rc<Signal>, old: Priority, new: Priority) {
        if old == new {
            return;
        }
        let mut queues = self.inner.queues.borrow_mut();
        let (old_set, new_set) = borrow_two_mut(&mut queues, old.index(), new.index());
        for kind in [TaskKind::Continuation, TaskKind::Fresh] {
            let source = old_set.lane(kind);
            let dest = new_set.lane(kind);
            dest.merge(source, |task| task.signal.as_ref().map(|s| Rc::ptr_eq(s, signal)).unwrap_or(false));
        }
    }
}
