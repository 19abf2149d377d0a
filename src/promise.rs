//! `PrioritizedFuture`: settlement routed through a [`Scheduler`] rather
//! than settling synchronously.
//!
//! [`PrioritizedFuture::then`]/[`::map`][PrioritizedFuture::map]/
//! [`::catch`][PrioritizedFuture::catch]/
//! [`::finally`][PrioritizedFuture::finally] each produce a new future
//! backed by the *same* owning signal as the one they're called on:
//! reprioritizing the controller reprioritizes every future still chained
//! off of it.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::controller::{ControllerOptions, TaskController};
use crate::error::TaskError;
use crate::priority::Priority;
use crate::scheduler::{Scheduler, TaskOptions};
use crate::signal::Signal;
use crate::task::TaskResult;

thread_local! {
    /// Process-wide default controller options for futures built through
    /// the static helpers below. Initial value is `{ priority: background }`,
    /// distinct from `Scheduler`'s own default priority (the middle tag)
    /// used when a task has no signal at all.
    static DEFAULT_CONTROLLER_OPTIONS: Cell<ControllerOptions> =
        Cell::new(ControllerOptions { priority: Some(Priority::Background) });
}

pub fn set_default_controller_options(options: ControllerOptions) {
    DEFAULT_CONTROLLER_OPTIONS.with(|cell| cell.set(options));
}

pub fn default_controller_options() -> ControllerOptions {
    DEFAULT_CONTROLLER_OPTIONS.with(|cell| cell.get())
}

/// A future that settles through a [`Scheduler`] rather than synchronously.
pub struct PrioritizedFuture<T> {
    rx: oneshot::Receiver<std::result::Result<T, TaskError>>,
    signal: Option<Rc<Signal>>,
}

impl<T> PrioritizedFuture<T> {
    pub(crate) fn new(rx: oneshot::Receiver<std::result::Result<T, TaskError>>, signal: Option<Rc<Signal>>) -> Self {
        Self { rx, signal }
    }

    /// The signal backing this future's settlement, if any was supplied at
    /// construction; `None` means it settles at the scheduler's default
    /// priority with no cancellation surface.
    pub fn signal(&self) -> Option<Rc<Signal>> {
        self.signal.clone()
    }
}

impl<T> Future for PrioritizedFuture<T> {
    type Output = std::result::Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(TaskError::Panicked("scheduler task was dropped before settling".into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: 'static> PrioritizedFuture<T> {
    /// Chains `reaction` onto this future's settlement, submitting it to
    /// `scheduler` as a new task sharing this future's signal.
    pub fn then<U: 'static>(
        self,
        scheduler: &Scheduler,
        reaction: impl FnOnce(std::result::Result<T, TaskError>) -> TaskResult<U> + 'static,
    ) -> PrioritizedFuture<U> {
        let signal = self.signal.clone();
        let scheduler = scheduler.clone();
        let options = TaskOptions { signal: signal.clone(), ..Default::default() };
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_local(async move {
            let settled = self.await;
            let continuation = scheduler.post_task(options, move || reaction(settled));
            let result = continuation.await;
            let _ = tx.send(result);
        });
        PrioritizedFuture::new(rx, signal)
    }

    /// Transforms a successful value; a rejection passes through unchanged
    /// except for being re-normalized to a message, per this crate's
    /// string-based callback error contract.
    pub fn map<U: 'static>(self, scheduler: &Scheduler, f: impl FnOnce(T) -> TaskResult<U> + 'static) -> PrioritizedFuture<U> {
        self.then(scheduler, move |result| match result {
            Ok(value) => f(value),
            Err(error) => Err(error.to_string()),
        })
    }

    /// Recovers from a rejection; a successful value passes through
    /// unchanged.
    pub fn catch(self, scheduler: &Scheduler, f: impl FnOnce(TaskError) -> TaskResult<T> + 'static) -> PrioritizedFuture<T> {
        self.then(scheduler, move |result| match result {
            Ok(value) => Ok(value),
            Err(error) => f(error),
        })
    }

    /// Runs `f` regardless of outcome, then passes the original outcome
    /// through unchanged.
    pub fn finally(self, scheduler: &Scheduler, f: impl FnOnce() + 'static) -> PrioritizedFuture<T> {
        self.then(scheduler, move |result| {
            f();
            result.map_err(|error| error.to_string())
        })
    }
}

/// Resolves or rejects a [`PrioritizedFuture`] constructed via
/// [`with_resolvers`] or [`new_with_executor`]. Settlement is still routed
/// through the scheduler as a task carrying the owning signal.
pub struct Resolver<T> {
    scheduler: Scheduler,
    signal: Rc<Signal>,
    tx: Rc<RefCell<Option<oneshot::Sender<std::result::Result<T, TaskError>>>>>,
}

impl<T: 'static> Resolver<T> {
    pub fn resolve(self, value: T) {
        let options = TaskOptions { signal: Some(Rc::clone(&self.signal)), ..Default::default() };
        let settlement = self.scheduler.post_task(options, move || Ok(value));
        forward(settlement, self.tx);
    }
}

pub struct Rejecter<T> {
    scheduler: Scheduler,
    signal: Rc<Signal>,
    tx: Rc<RefCell<Option<oneshot::Sender<std::result::Result<T, TaskError>>>>>,
}

impl<T: 'static> Rejecter<T> {
    pub fn reject(self, reason: impl Into<String>) {
        let reason = reason.into();
        let options = TaskOptions { signal: Some(Rc::clone(&self.signal)), ..Default::default() };
        let settlement: PrioritizedFuture<T> = self.scheduler.post_task(options, move || Err(reason));
        forward(settlement, self.tx);
    }
}

fn forward<T: 'static>(
    settlement: PrioritizedFuture<T>,
    tx: Rc<RefCell<Option<oneshot::Sender<std::result::Result<T, TaskError>>>>>,
) {
    tokio::task::spawn_local(async move {
        let result = settlement.await;
        if let Some(sender) = tx.borrow_mut().take() {
            let _ = sender.send(result);
        }
    });
}

/// Where a directly-constructed [`PrioritizedFuture`] gets its owning
/// controller from.
pub enum ControllerSource {
    /// Share an already-existing controller's signal.
    Existing(Rc<Signal>),
    /// Build a fresh controller from these options.
    Fresh(ControllerOptions),
    /// Build a fresh controller at exactly this priority.
    AtPriority(Priority),
    /// Build a fresh controller from the process-wide default controller
    /// options (initial value `{ priority: background }`).
    Default,
}

/// `executor` receives a [`Resolver`]/[`Rejecter`] pair and may call either
/// (but should call at most one) synchronously or later.
pub fn new_with_executor<T: 'static>(
    scheduler: &Scheduler,
    source: ControllerSource,
    executor: impl FnOnce(Resolver<T>, Rejecter<T>),
) -> PrioritizedFuture<T> {
    let signal = match source {
        ControllerSource::Existing(signal) => signal,
        ControllerSource::Fresh(options) => TaskController::new(options).signal(),
        ControllerSource::AtPriority(priority) => TaskController::with_priority(priority).signal(),
        ControllerSource::Default => TaskController::new(default_controller_options()).signal(),
    };

    let (tx, rx) = oneshot::channel();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let resolve = Resolver { scheduler: scheduler.clone(), signal: Rc::clone(&signal), tx: Rc::clone(&tx) };
    let reject = Rejecter { scheduler: scheduler.clone(), signal: Rc::clone(&signal), tx };

    executor(resolve, reject);

    PrioritizedFuture::new(rx, Some(signal))
}

/// Returns a future alongside detached resolve/reject handles.
pub fn with_resolvers<T: 'static>(scheduler: &Scheduler) -> (PrioritizedFuture<T>, Resolver<T>, Rejecter<T>) {
    let signal = TaskController::new(default_controller_options()).signal();
    let (tx, rx) = oneshot::channel();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let resolve = Resolver { scheduler: scheduler.clone(), signal: Rc::clone(&signal), tx: Rc::clone(&tx) };
    let reject = Rejecter { scheduler: scheduler.clone(), signal: Rc::clone(&signal), tx };
    (PrioritizedFuture::new(rx, Some(signal)), resolve, reject)
}

/// A future that's already settled with `value`.
pub fn resolve<T: 'static>(scheduler: &Scheduler, value: T) -> PrioritizedFuture<T> {
    scheduler.post_task(TaskOptions::default(), move || Ok(value))
}

/// A future that's already settled with `reason` as a rejection.
pub fn reject<T: 'static>(scheduler: &Scheduler, reason: impl Into<String>) -> PrioritizedFuture<T> {
    let reason = reason.into();
    scheduler.post_task(TaskOptions::default(), move || Err(reason))
}

/// Runs `f` as a scheduled task, capturing either its return value or its
/// failure as a rejection.
pub fn try_call<T: 'static>(scheduler: &Scheduler, f: impl FnOnce() -> TaskResult<T> + 'static) -> PrioritizedFuture<T> {
    scheduler.post_task(TaskOptions::default(), f)
}

fn settle_via<T: 'static>(
    scheduler: &Scheduler,
    work: impl Future<Output = std::result::Result<T, TaskError>> + 'static,
) -> PrioritizedFuture<T> {
    let signal = TaskController::new(default_controller_options()).signal();
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_local(async move {
        let result = work.await;
        let _ = tx.send(result);
    });
    PrioritizedFuture::new(rx, Some(signal))
}

/// Waits for every future, short-circuiting the final result (not the
/// underlying work) on the first rejection.
pub fn all<T: 'static>(scheduler: &Scheduler, futures: Vec<PrioritizedFuture<T>>) -> PrioritizedFuture<Vec<T>> {
    settle_via(scheduler, async move {
        let results = futures::future::join_all(futures).await;
        let mut values = Vec::with_capacity(results.len());
        for result in results {
            values.push(result?);
        }
        Ok(values)
    })
}

/// Always resolves, with one outcome per input future.
pub fn all_settled<T: 'static>(
    scheduler: &Scheduler,
    futures: Vec<PrioritizedFuture<T>>,
) -> PrioritizedFuture<Vec<std::result::Result<T, TaskError>>> {
    settle_via(scheduler, async move { Ok(futures::future::join_all(futures).await) })
}

/// Settles with whichever future settles first, successful or not.
pub fn race<T: 'static>(scheduler: &Scheduler, futures: Vec<PrioritizedFuture<T>>) -> PrioritizedFuture<T> {
    settle_via(scheduler, async move {
        let (result, _index, _rest) = futures::future::select_all(futures.into_iter().map(Box::pin)).await;
        result
    })
}

/// Resolves with the first success, or rejects once every future has
/// rejected.
pub fn any<T: 'static>(scheduler: &Scheduler, futures: Vec<PrioritizedFuture<T>>) -> PrioritizedFuture<T> {
    settle_via(scheduler, async move {
        let mut pending: Vec<_> = futures.into_iter().map(Box::pin).collect();
        let mut last_error = None;
        while !pending.is_empty() {
            let (result, _index, rest) = futures::future::select_all(pending).await;
            match result {
                Ok(value) => return Ok(value),
                Err(error) => {
                    last_error = Some(error);
                    pending = rest;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TaskError::CallbackFailed("no futures were provided to any".into())))
    })
}
