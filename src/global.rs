//! Process-local installation of a default [`Scheduler`], adapted from the
//! source polyfill's feature-detection/installation shim.
//!
//! The original checks whether the host already exposes the scheduling API
//! and, if so, does nothing; if only `yield` is missing, it patches in
//! just that piece. Neither check has a Rust analogue: there is one
//! `LocalSet` per thread rather than a shared, possibly-already-patched
//! realm, so installation here is simply "first `install` call wins, every
//! later one is a no-op".

use std::cell::RefCell;

use crate::scheduler::Scheduler;

thread_local! {
    static INSTALLED: RefCell<Option<Scheduler>> = RefCell::new(None);
}

/// Installs `scheduler` as this thread's default, unless one is already
/// installed, in which case the existing instance is returned unchanged.
pub fn install(scheduler: Scheduler) -> Scheduler {
    INSTALLED.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(scheduler);
        }
        slot.clone().expect("just ensured Some above")
    })
}

/// Returns this thread's installed scheduler, if any.
pub fn global() -> Option<Scheduler> {
    INSTALLED.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use std::rc::Rc;

    #[tokio::test(flavor = "current_thread")]
    async fn first_install_wins() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                assert!(global().is_none());

                let (driver, _join) = crate::host::TokioHost::new(true);
                let first = Scheduler::new(SchedulerConfig::builder().idle_available(true).build(), Rc::new(driver));
                install(first);
                assert!(global().is_some());

                let (driver2, _join2) = crate::host::TokioHost::new(false);
                let second = Scheduler::new(SchedulerConfig::builder().idle_available(false).build(), Rc::new(driver2));
                let returned = install(second);
                assert!(returned.config().idle_available, "install is a no-op once a scheduler is already set");
            })
            .await;
    }
}
