//! The host-callback abstraction: one thunk, run once, soon, cancellably,
//! via whichever of three yield primitives the host provides.
//!
//! The primitives themselves -- a message-port round trip, a millisecond
//! timer, an optional idle-time callback -- are explicitly out of scope for
//! this crate; they're the host's responsibility. [`HostDriver`]
//! is the trait boundary through which the scheduler consumes them.
//! [`TokioHost`] is the concrete implementation this repository's tests and
//! the scheduler's own examples use, backed by a single-threaded `tokio`
//! runtime driven through a `LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::priority::Priority;

pub(crate) type Thunk = Box<dyn FnOnce()>;

/// A one-shot, cancellable request to the host runtime to re-enter the
/// scheduler.
pub struct HostCallback {
    cancelled: Rc<Cell<bool>>,
    is_idle: bool,
    _handle: Option<JoinHandle<()>>,
}

impl HostCallback {
    /// Whether this callback was armed via the idle-time primitive. Lets
    /// the scheduler recognize and upgrade a too-lazy pending wakeup
    /// (arming policy, `isIdleCallback`).
    pub fn is_idle_callback(&self) -> bool {
        self.is_idle
    }

    /// Idempotent: cancelling more than once, or after the thunk has
    /// already fired, has no further effect.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }
}

/// The host-side surface the scheduler multiplexes over.
pub trait HostDriver {
    /// Whether the idle-time primitive is available on this host. A host
    /// that lacks it always returns `false` here, matching the "else if an
    /// idle primitive is available" branch of the selection rule.
    fn idle_available(&self) -> bool;

    /// Arms `thunk` to run via the primitive selected for `(priority,
    /// delay)`, per the selection rule:
    /// `delay > 0` forces the timer; else background work uses idle time if
    /// available; else the message port; else the timer as a last resort.
    fn schedule(&self, priority: Priority, delay: Duration, thunk: Thunk) -> HostCallback;
}

/// A [`HostDriver`] backed by a `tokio` current-thread runtime. Every
/// primitive is spawned with [`tokio::task::spawn_local`], so a
/// `TokioHost` may only be driven from within a `tokio::task::LocalSet`
/// (the scheduler is `!Send`/`!Sync` by design).
pub struct TokioHost {
    idle_available: bool,
    /// In-flight message-port thunks, keyed by a monotonically increasing
    /// handle, mirroring a handle-keyed round trip.
    inflight: Rc<RefCell<HashMap<u64, Thunk>>>,
    next_handle: Cell<u64>,
    port_tx: mpsc::UnboundedSender<u64>,
}

impl TokioHost {
    /// Spawns the long-lived receive loop backing the message-port
    /// primitive and returns a driver plus that loop's [`JoinHandle`].
    /// Callers should keep the handle alive for as long as the scheduler
    /// runs; dropping it tears down the message-port primitive.
    pub fn new(idle_available: bool) -> (Self, JoinHandle<()>) {
        let (port_tx, mut port_rx) = mpsc::unbounded_channel::<u64>();
        let inflight: Rc<RefCell<HashMap<u64, Thunk>>> = Rc::new(RefCell::new(HashMap::new()));

        let recv_inflight = Rc::clone(&inflight);
        let join = tokio::task::spawn_local(async move {
            while let Some(handle) = port_rx.recv().await {
                if let Some(thunk) = recv_inflight.borrow_mut().remove(&handle) {
                    thunk();
                }
            }
        });

        (Self { idle_available, inflight, next_handle: Cell::new(0), port_tx }, join)
    }

    fn schedule_message_port(&self, thunk: Thunk) -> HostCallback {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);

        let cancelled = Rc::new(Cell::new(false));
        let guard = Rc::clone(&cancelled);
        let guarded: Thunk = Box::new(move || {
            if !guard.get() {
                thunk();
            }
        });
        self.inflight.borrow_mut().insert(handle, guarded);
        // If the receive loop has already been torn down this send is
        // simply unobserved; the message-port contract only promises
        // delivery while the host is running.
        let _ = self.port_tx.send(handle);

        HostCallback { cancelled, is_idle: false, _handle: None }
    }

    fn schedule_timer(&self, delay: Duration, thunk: Thunk) -> HostCallback {
        let cancelled = Rc::new(Cell::new(false));
        let guard = Rc::clone(&cancelled);
        let handle = tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !guard.get() {
                thunk();
            }
        });
        HostCallback { cancelled, is_idle: false, _handle: Some(handle) }
    }

    fn schedule_idle(&self, thunk: Thunk) -> HostCallback {
        let cancelled = Rc::new(Cell::new(false));
        let guard = Rc::clone(&cancelled);
        let handle = tokio::task::spawn_local(async move {
            // There is no true idle-time signal on a tokio `LocalSet`; one
            // cooperative yield, letting already-ready work drain first, is
            // this host's emulation of "idle", not the scheduler's concern.
            tokio::task::yield_now().await;
            if !guard.get() {
                thunk();
            }
        });
        HostCallback { cancelled, is_idle: true, _handle: Some(handle) }
    }
}

impl HostDriver for TokioHost {
    fn idle_available(&self) -> bool {
        self.idle_available
    }

    fn schedule(&self, priority: Priority, delay: Duration, thunk: Thunk) -> HostCallback {
        if !delay.is_zero() {
            return self.schedule_timer(delay, thunk);
        }
        if priority == Priority::Background && self.idle_available() {
            return self.schedule_idle(thunk);
        }
        self.schedule_message_port(thunk)
    }
}
