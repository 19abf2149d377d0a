//! A cooperative, priority-aware task scheduler with a Promise-style
//! settlement facade.
//!
//! - [`scheduler`] -- the dispatch core: per-priority queues, the pending
//! host callback, submission and migration.
//! - [`queue`] -- the intrusive doubly-linked queue backing each priority
//! lane.
//! - [`task`] -- the task record linked into those queues.
//! - [`priority`] -- the three priority tags and their dispatch order.
//! - [`host`] -- the host-callback abstraction multiplexing the
//! message-port, timer, and idle-time primitives.
//! - [`signal`] / [`controller`] -- cancellation and mutable priority.
//! - [`promise`] -- `PrioritizedFuture`, whose settlement is always routed
//! through a [`scheduler::Scheduler`] task.
//! - [`global`] -- process-local installation of a default scheduler.
//! - [`error`] -- the crate's error types.
//!
//! The scheduler is `!Send`/`!Sync` by design (no state mutation crosses a
//! thread boundary); drive it inside a `tokio::task::LocalSet`.

pub mod controller;
pub mod error;
pub mod global;
pub mod host;
pub mod priority;
pub mod promise;
mod queue;
pub mod scheduler;
mod signal;
mod task;

pub use controller::{ControllerOptions, TaskController};
pub use error::{Result, SchedulerError, TaskError};
pub use host::{HostCallback, HostDriver, TokioHost};
pub use priority::Priority;
pub use promise::PrioritizedFuture;
pub use scheduler::{Scheduler, SchedulerConfig, TaskOptions};
pub use signal::Signal;
pub use task::TaskResult;
