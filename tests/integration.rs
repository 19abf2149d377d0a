//! End-to-end scenarios for the scheduler and its settlement facade.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use prioritized_scheduler::promise::{self, ControllerSource};
use prioritized_scheduler::{Priority, Scheduler, SchedulerConfig, TaskController, TaskOptions, TokioHost};

fn scheduler(idle_available: bool) -> Scheduler {
    let (driver, _join) = TokioHost::new(idle_available);
    Scheduler::new(SchedulerConfig::default(), Rc::new(driver))
}

// ───────────────────────────────────────────────────────────────────────
// S1 — submission order across priorities with no signal
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn s1_dispatches_highest_priority_first_regardless_of_submission_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let order = Rc::new(RefCell::new(Vec::new()));

            let order_a = Rc::clone(&order);
            let a = scheduler.post_task(
                TaskOptions { priority: Some(Priority::Background), ..Default::default() },
                move || {
                    order_a.borrow_mut().push('A');
                    Ok::<_, String>(())
                },
            );
            let order_b = Rc::clone(&order);
            let b = scheduler.post_task(
                TaskOptions { priority: Some(Priority::UserBlocking), ..Default::default() },
                move || {
                    order_b.borrow_mut().push('B');
                    Ok::<_, String>(())
                },
            );
            let order_c = Rc::clone(&order);
            let c = scheduler.post_task(
                TaskOptions { priority: Some(Priority::UserVisible), ..Default::default() },
                move || {
                    order_c.borrow_mut().push('C');
                    Ok::<_, String>(())
                },
            );

            a.await.unwrap();
            b.await.unwrap();
            c.await.unwrap();
            assert_eq!(*order.borrow(), vec!['B', 'C', 'A']);
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// S2 — priority migration carries queued tasks across, in order
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn s2_prioritychange_migrates_both_tasks_in_submission_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let controller = TaskController::with_priority(Priority::UserVisible);
            let order = Rc::new(RefCell::new(Vec::new()));

            // Occupies the user-blocking lane until we're ready, so A and B
            // can't slip out before the migration actually happens.
            let gate = Rc::new(tokio::sync::Notify::new());
            let gate_wait = Rc::clone(&gate);
            let order_gate = Rc::clone(&order);
            let blocker = scheduler.post_task(
                TaskOptions { priority: Some(Priority::UserBlocking), ..Default::default() },
                move || {
                    order_gate.borrow_mut().push("blocker");
                    gate_wait.notify_one();
                    Ok::<_, String>(())
                },
            );

            let order_a = Rc::clone(&order);
            let a = scheduler.post_task(
                TaskOptions { signal: Some(controller.signal()), ..Default::default() },
                move || {
                    order_a.borrow_mut().push("A");
                    Ok::<_, String>(())
                },
            );
            let order_b = Rc::clone(&order);
            let b = scheduler.post_task(
                TaskOptions { signal: Some(controller.signal()), ..Default::default() },
                move || {
                    order_b.borrow_mut().push("B");
                    Ok::<_, String>(())
                },
            );

            // Another user-visible task submitted before the change must
            // not be overtaken by A/B once they migrate up.
            let order_before = Rc::clone(&order);
            let before = scheduler.post_task(TaskOptions::default(), move || {
                order_before.borrow_mut().push("before");
                Ok::<_, String>(())
            });

            controller.set_priority(Priority::UserBlocking).unwrap();

            blocker.await.unwrap();
            gate.notified().await;
            a.await.unwrap();
            b.await.unwrap();
            before.await.unwrap();

            assert_eq!(*order.borrow(), vec!["blocker", "A", "B", "before"]);
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// S3 — delay is a floor, and ready work overtakes a delayed task
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn s3_delayed_task_runs_no_earlier_than_its_delay_and_is_overtaken() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let order = Rc::new(RefCell::new(Vec::new()));

            let order_a = Rc::clone(&order);
            let a = scheduler.post_task(
                TaskOptions { delay: Duration::from_millis(20), ..Default::default() },
                move || {
                    order_a.borrow_mut().push("A");
                    Ok::<_, String>(())
                },
            );

            tokio::time::advance(Duration::from_millis(10)).await;

            let order_b = Rc::clone(&order);
            let b = scheduler.post_task(TaskOptions::default(), move || {
                order_b.borrow_mut().push("B");
                Ok::<_, String>(())
            });
            b.await.unwrap();
            assert_eq!(*order.borrow(), vec!["B"], "B must dispatch before A's delay elapses");

            tokio::time::advance(Duration::from_millis(15)).await;
            a.await.unwrap();
            assert_eq!(*order.borrow(), vec!["B", "A"]);
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// S4 — abort before and after submission
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn s4_abort_before_dispatch_rejects_with_the_signal_reason() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let controller = TaskController::with_priority(Priority::Background);
            let ran = Rc::new(RefCell::new(false));
            let ran_ref = Rc::clone(&ran);

            let future = scheduler.post_task(
                TaskOptions { signal: Some(controller.signal()), ..Default::default() },
                move || {
                    *ran_ref.borrow_mut() = true;
                    Ok::<_, String>(())
                },
            );

            controller.abort("stop");
            let result = future.await;
            assert!(matches!(result, Err(prioritized_scheduler::TaskError::Cancelled(r)) if r == "stop"));
            assert!(!*ran.borrow());
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// S5 — direct construction, default controller priority
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn s5_default_controller_priority_is_background_and_resolve_yields_its_value() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let future = promise::new_with_executor(&scheduler, ControllerSource::Default, |resolve, _reject| {
                resolve.resolve(1);
            });

            let signal = future.signal().expect("constructed with a controller");
            assert_eq!(signal.priority(), Some(Priority::Background));
            assert_eq!(future.await.unwrap(), 1);
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// S6 — chain propagation shares one controller
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn s6_then_shares_the_same_controller_and_observes_its_priority_changes() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let controller = TaskController::with_priority(Priority::UserVisible);

            let p1 = scheduler.post_task(
                TaskOptions { signal: Some(controller.signal()), ..Default::default() },
                || Ok::<_, String>(1),
            );
            let p1_signal = p1.signal().unwrap();
            let p2 = p1.map(&scheduler, |value| Ok(value + 1));
            let p2_signal = p2.signal().unwrap();

            assert!(Rc::ptr_eq(&p1_signal, &p2_signal), "chained futures must share one controller's signal");

            controller.set_priority(Priority::UserBlocking).unwrap();
            assert_eq!(p2_signal.priority(), Some(Priority::UserBlocking));
            assert_eq!(p2.await.unwrap(), 2);
        })
        .await;
}

// ───────────────────────────────────────────────────────────────────────
// A handful of quantified invariants and round-trip properties
// ───────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn noop_priority_change_through_the_controller_surface() {
    let controller = TaskController::with_priority(Priority::Background);
    controller.set_priority(Priority::Background).unwrap();
    assert_eq!(controller.signal().priority(), Some(Priority::Background));
}

#[tokio::test(flavor = "current_thread")]
async fn roundtrip_set_priority_a_b_a_leaves_signal_at_a() {
    let controller = TaskController::with_priority(Priority::Background);
    controller.set_priority(Priority::UserBlocking).unwrap();
    controller.set_priority(Priority::UserVisible).unwrap();
    controller.set_priority(Priority::Background).unwrap();
    assert_eq!(controller.signal().priority(), Some(Priority::Background));
}

#[tokio::test(flavor = "current_thread")]
async fn roundtrip_aborting_a_delayed_task_cancels_its_timer_without_running_it() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let controller = TaskController::with_priority(Priority::Background);
            let ran = Rc::new(RefCell::new(false));
            let ran_ref = Rc::clone(&ran);

            let future = scheduler.post_task(
                TaskOptions {
                    signal: Some(controller.signal()),
                    delay: Duration::from_millis(50),
                    ..Default::default()
                },
                move || {
                    *ran_ref.borrow_mut() = true;
                    Ok::<_, String>(())
                },
            );

            controller.abort("gave up waiting");
            assert!(matches!(future.await, Err(prioritized_scheduler::TaskError::Cancelled(_))));
            assert!(!*ran.borrow());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn all_settled_reports_both_outcomes_without_short_circuiting() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let ok = scheduler.post_task(TaskOptions::default(), || Ok::<_, String>(1));
            let err = scheduler.post_task(TaskOptions::default(), || Err::<i32, _>("boom".to_string()));

            let results = promise::all_settled(&scheduler, vec![ok, err]).await.unwrap();
            assert!(results[0].is_ok());
            assert!(results[1].is_err());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn all_rejects_if_any_future_rejects() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = scheduler(true);
            let ok = scheduler.post_task(TaskOptions::default(), || Ok::<_, String>(1));
            let err = scheduler.post_task(TaskOptions::default(), || Err::<i32, _>("boom".to_string()));

            let result = promise::all(&scheduler, vec![ok, err]).await;
            assert!(result.is_err());
        })
        .await;
}
