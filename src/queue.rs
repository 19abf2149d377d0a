//! The intrusive doubly-linked task queue.
//!
//! Link fields live on the [`TaskRecord`] itself, so push/pop/remove are
//! O(1) with no separate node allocation. Grounded on the ready-queue
//! pattern used by `intrusive_collections::LinkedList` in
//! `other_examples/9d5dda27_...round_robin.rs.rs` and
//! `other_examples/cb80531d_...sched.rs.rs`, adapted here from their `Arc`
//! ready-lists to `Rc` because this scheduler is single-threaded.

use std::rc::Rc;

use intrusive_collections::LinkedList;

use crate::task::{SequenceCounter, TaskAdapter, TaskRecord};

/// One priority lane's queue: push-tail, pop-head, remove-arbitrary, and a
/// selective merge.
pub(crate) struct Queue {
    list: LinkedList<TaskAdapter>,
}

impl Queue {
    pub(crate) fn new() -> Self {
        Self { list: LinkedList::new(TaskAdapter::new()) }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Stamps `task` with the next sequence id and pushes it to the tail.
    pub(crate) fn push(&mut self, sequence: &SequenceCounter, task: Rc<TaskRecord>) {
        task.sequence_id.set(sequence.next());
        self.list.push_back(task);
    }

    /// Pops the head of the queue, if any.
    pub(crate) fn take_next(&mut self) -> Option<Rc<TaskRecord>> {
        self.list.pop_front()
    }

    /// Removes `task` from this queue in O(1), given that it is currently
    /// linked into *this* queue ("remove-arbitrary").
    ///
    /// Unused by the scheduler's own abort path by design (an aborted task
    /// is lazily skipped at dispatch rather than eagerly unlinked; see
    /// DESIGN.md), but kept as a queue primitive and exercised directly
    /// below.
    pub(crate) fn remove(&mut self, task: &Rc<TaskRecord>) -> bool {
        if !task.link.is_linked() {
            return false;
        }
        let ptr: *const TaskRecord = Rc::as_ptr(task);
        // SAFETY: `task` is linked (checked above) and every task is linked
        // into at most one queue at a time, so if it is linked at all it is
        // linked into `self`.
        let mut cursor = unsafe { self.list.cursor_mut_from_ptr(ptr) };
        cursor.remove().is_some()
    }

    /// Moves every task matching `predicate` out of `source` into `self`,
    /// inserting each one at its sequence-id-ordered position rather than
    /// always at the tail, so migrated tasks interleave with residents by
    /// sequence id instead of trailing behind all of them.
    ///
    /// Both cursors only ever advance forward. `source` is visited in
    /// sequence-id order (its own push-tail invariant), so successive
    /// migrants have non-decreasing sequence ids; the destination cursor
    /// therefore never needs to rewind to find each migrant's insertion
    /// point. `remove` on the source cursor auto-advances it past the
    /// removed element; `insert_before` on a destination cursor parked at
    /// the "null" (one-past-end) position appends to the tail.
    pub(crate) fn merge(&mut self, source: &mut Queue, mut predicate: impl FnMut(&TaskRecord) -> bool) {
        let mut dest = self.list.front_mut();
        let mut cursor = source.list.front_mut();
        while let Some(task_ref) = cursor.get() {
            if !predicate(task_ref) {
                cursor.move_next();
                continue;
            }
            let sequence_id = task_ref.sequence_id.get();
            while let Some(resident) = dest.get() {
                if resident.sequence_id.get() > sequence_id {
                    break;
                }
                dest.move_next();
            }
            let task = cursor.remove().expect("cursor was positioned on an element");
            dest.insert_before(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn record() -> Rc<TaskRecord> {
        Rc::new(TaskRecord::new(TaskKind::Fresh, None, None))
    }

    #[test]
    fn pushes_and_pops_in_fifo_order() {
        let sequence = SequenceCounter::new();
        let mut queue = Queue::new();
        let a = record();
        let b = record();
        queue.push(&sequence, Rc::clone(&a));
        queue.push(&sequence, Rc::clone(&b));

        assert!(Rc::ptr_eq(&queue.take_next().unwrap(), &a));
        assert!(Rc::ptr_eq(&queue.take_next().unwrap(), &b));
        assert!(queue.take_next().is_none());
    }

    #[test]
    fn remove_arbitrary_unlinks_without_disturbing_order() {
        let sequence = SequenceCounter::new();
        let mut queue = Queue::new();
        let a = record();
        let b = record();
        let c = record();
        queue.push(&sequence, Rc::clone(&a));
        queue.push(&sequence, Rc::clone(&b));
        queue.push(&sequence, Rc::clone(&c));

        assert!(queue.remove(&b));
        assert!(!queue.remove(&b), "removing twice is a no-op, not a double-free");

        assert!(Rc::ptr_eq(&queue.take_next().unwrap(), &a));
        assert!(Rc::ptr_eq(&queue.take_next().unwrap(), &c));
    }

    #[test]
    fn merge_moves_matching_tasks_preserving_order() {
        let sequence = SequenceCounter::new();
        let mut source = Queue::new();
        let mut dest = Queue::new();

        let keep = record();
        let move_first = record();
        let move_second = record();
        source.push(&sequence, Rc::clone(&keep));
        source.push(&sequence, Rc::clone(&move_first));
        source.push(&sequence, Rc::clone(&move_second));

        let move_first_ptr = Rc::as_ptr(&move_first);
        let move_second_ptr = Rc::as_ptr(&move_second);
        dest.merge(&mut source, |task| {
            let ptr = task as *const TaskRecord;
            ptr == move_first_ptr || ptr == move_second_ptr
        });

        assert!(Rc::ptr_eq(&source.take_next().unwrap(), &keep));
        assert!(source.take_next().is_none());

        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &move_first));
        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &move_second));
    }

    #[test]
    fn merge_into_nonempty_destination_appends_at_tail() {
        let sequence = SequenceCounter::new();
        let mut source = Queue::new();
        let mut dest = Queue::new();

        let already_there = record();
        dest.push(&sequence, Rc::clone(&already_there));

        let migrating = record();
        source.push(&sequence, Rc::clone(&migrating));

        dest.merge(&mut source, |_| true);

        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &already_there));
        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &migrating));
    }

    #[test]
    fn merge_inserts_a_lower_sequence_migrant_before_a_higher_sequence_resident() {
        let sequence = SequenceCounter::new();
        let mut source = Queue::new();
        let mut dest = Queue::new();

        // The migrant is stamped first (lower sequence id) even though it
        // starts out in `source`, not `dest`.
        let migrating = record();
        source.push(&sequence, Rc::clone(&migrating));

        let already_there = record();
        dest.push(&sequence, Rc::clone(&already_there));

        dest.merge(&mut source, |_| true);

        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &migrating), "lower sequence id must dispatch first");
        assert!(Rc::ptr_eq(&dest.take_next().unwrap(), &already_there));
    }
}
