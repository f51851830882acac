//! Master task scheduler
//!
//! Holds an unordered pool of pending tasks and answers one question: which
//! task should run next, and if none is due, when to wake up. Separately it
//! enforces start timeouts: a non-recurring task whose start is no longer
//! useful is swept out of the pool with a single `on_start_timeout` callback.
//!
//! The scheduler knows nothing about the link; the master stack glue takes
//! the selected task and drives a transaction through the link layer, then
//! reschedules or completes the task.

use crate::runtime::{Runtime, Timer, Timestamp};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Task-type priority rank; lower rank outranks higher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskPriority(pub u8);

/// A schedulable unit of master-side work
pub trait MasterTask {
    /// When this task next wants to run
    fn expiration_time(&self) -> Timestamp;

    /// Latest moment at which starting is still useful; only meaningful for
    /// non-recurring tasks
    fn start_expiration_time(&self) -> Timestamp;

    /// Recurring tasks reschedule themselves and are exempt from start
    /// timeouts
    fn is_recurring(&self) -> bool;

    /// Rank used to break ties among expired tasks
    fn priority(&self) -> TaskPriority;

    /// The task has been selected and is about to drive the link
    fn on_start(&mut self);

    /// The peer answered the task's request
    fn on_response(&mut self, now: Timestamp);

    /// The task sat unstarted past its start expiration and left the pool
    fn on_start_timeout(&mut self, now: Timestamp);

    /// The transaction driving this task failed
    fn on_failure(&mut self, now: Timestamp);
}

/// Shared handle to a pending task
///
/// The master stack owns its tasks; the scheduler holds these non-owning-in-
/// spirit shared handles only while a task is pending.
pub type TaskHandle = Rc<RefCell<dyn MasterTask>>;

/// Outcome of asking the scheduler for work
pub enum NextTask {
    /// An expired task, removed from the pool; run it now
    Ready(TaskHandle),
    /// Nothing is due; the earliest pending expiration is at this instant
    Wait(Timestamp),
    /// The pool is empty
    Idle,
}

/// Which of two tasks should run first at instant `now`
///
/// Total order: expired tasks outrank unexpired; among expired tasks lower
/// priority rank wins, then earlier expiration; among unexpired tasks
/// earlier expiration wins. Ties prefer `left`, which keeps the pairwise
/// reduction stable in insertion order.
fn left_runs_first(now: Timestamp, left: &dyn MasterTask, right: &dyn MasterTask) -> bool {
    let left_expired = left.expiration_time() <= now;
    let right_expired = right.expiration_time() <= now;

    match (left_expired, right_expired) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => {
            if left.priority() != right.priority() {
                left.priority() < right.priority()
            } else {
                left.expiration_time() <= right.expiration_time()
            }
        }
        (false, false) => left.expiration_time() <= right.expiration_time(),
    }
}

struct SchedulerInner {
    runtime: Runtime,
    timer: Timer,
    tasks: Vec<TaskHandle>,
}

/// Priority scheduler over the master's pending tasks
#[derive(Clone)]
pub struct MasterScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl MasterScheduler {
    /// Create a scheduler driving its start-timeout timer from `runtime`
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                runtime: runtime.clone(),
                timer: runtime.timer(),
                tasks: Vec::new(),
            })),
        }
    }

    /// Add a task to the pending pool
    pub fn schedule(&self, task: TaskHandle) {
        self.inner.borrow_mut().tasks.push(task);
        self.recalculate_start_timeout();
    }

    /// Select the next task at instant `now`
    ///
    /// Returns [`NextTask::Ready`] with the highest-priority expired task
    /// (removed from the pool) iff some pending task has expired; otherwise
    /// the earliest future expiration, or [`NextTask::Idle`] for an empty
    /// pool.
    pub fn get_next(&self, now: Timestamp) -> NextTask {
        let mut inner = self.inner.borrow_mut();
        if inner.tasks.is_empty() {
            return NextTask::Idle;
        }

        let mut best = 0;
        for candidate in 1..inner.tasks.len() {
            let prefer_best = left_runs_first(
                now,
                &*inner.tasks[best].borrow(),
                &*inner.tasks[candidate].borrow(),
            );
            if !prefer_best {
                best = candidate;
            }
        }

        let expiration = inner.tasks[best].borrow().expiration_time();
        if expiration <= now {
            NextTask::Ready(inner.tasks.remove(best))
        } else {
            NextTask::Wait(expiration)
        }
    }

    /// Cancel the start-timeout timer and drop all pending tasks without
    /// invoking any callbacks
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.timer.cancel();
        inner.tasks.clear();
    }

    /// Number of tasks currently pending
    pub fn num_pending(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Deadline of the armed start-timeout timer, if any
    pub fn start_timeout_deadline(&self) -> Option<Timestamp> {
        self.inner.borrow().timer.expires_at()
    }

    /// Sweep non-recurring tasks whose start expiration has passed
    fn check_start_timeout(&self) {
        let now = self.inner.borrow().runtime.now();

        let timed_out: Vec<TaskHandle> = {
            let mut inner = self.inner.borrow_mut();
            let (expired, kept) = inner.tasks.drain(..).partition(|task| {
                let task = task.borrow();
                !task.is_recurring() && task.start_expiration_time() <= now
            });
            inner.tasks = kept;
            expired
        };

        // Callbacks run with the pool released; a task may reschedule itself
        for task in timed_out {
            debug!("start timeout");
            task.borrow_mut().on_start_timeout(now);
        }

        self.recalculate_start_timeout();
    }

    /// Re-arm the start-timeout timer at the earliest start expiration among
    /// non-recurring pending tasks, or disarm it if none remain
    fn recalculate_start_timeout(&self) {
        let inner = self.inner.borrow();

        let earliest = inner
            .tasks
            .iter()
            .filter(|task| !task.borrow().is_recurring())
            .map(|task| task.borrow().start_expiration_time())
            .min();

        match earliest {
            Some(deadline) => {
                let weak: Weak<RefCell<SchedulerInner>> = Rc::downgrade(&self.inner);
                inner.timer.restart(deadline, move || {
                    if let Some(inner) = weak.upgrade() {
                        MasterScheduler { inner }.check_start_timeout();
                    }
                });
            }
            None => inner.timer.cancel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct TestTask {
        expiration: Timestamp,
        start_expiration: Timestamp,
        recurring: bool,
        priority: TaskPriority,
        name: &'static str,
        start_timeouts: Rc<RefCell<Vec<&'static str>>>,
    }

    impl MasterTask for TestTask {
        fn expiration_time(&self) -> Timestamp {
            self.expiration
        }
        fn start_expiration_time(&self) -> Timestamp {
            self.start_expiration
        }
        fn is_recurring(&self) -> bool {
            self.recurring
        }
        fn priority(&self) -> TaskPriority {
            self.priority
        }
        fn on_start(&mut self) {}
        fn on_response(&mut self, _now: Timestamp) {}
        fn on_start_timeout(&mut self, _now: Timestamp) {
            self.start_timeouts.borrow_mut().push(self.name);
        }
        fn on_failure(&mut self, _now: Timestamp) {}
    }

    fn task(
        name: &'static str,
        expiration: u64,
        start_expiration: u64,
        recurring: bool,
        priority: u8,
        log: &Rc<RefCell<Vec<&'static str>>>,
    ) -> TaskHandle {
        Rc::new(RefCell::new(TestTask {
            expiration: Timestamp::from_millis(expiration),
            start_expiration: Timestamp::from_millis(start_expiration),
            recurring,
            priority: TaskPriority(priority),
            name,
            start_timeouts: log.clone(),
        }))
    }

    fn expiration_of(handle: &TaskHandle) -> Timestamp {
        handle.borrow().expiration_time()
    }

    #[test]
    fn test_empty_pool_is_idle() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        assert!(matches!(scheduler.get_next(Timestamp::ZERO), NextTask::Idle));
    }

    #[test]
    fn test_unexpired_pool_reports_earliest_deadline() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("a", 500, u64::MAX, true, 0, &log));
        scheduler.schedule(task("b", 200, u64::MAX, true, 0, &log));

        match scheduler.get_next(Timestamp::from_millis(100)) {
            NextTask::Wait(deadline) => assert_eq!(deadline, Timestamp::from_millis(200)),
            _ => panic!("expected a wait"),
        }
        assert_eq!(scheduler.num_pending(), 2);
    }

    #[test]
    fn test_expired_outranks_unexpired() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        // lower priority number but not yet due
        scheduler.schedule(task("later", 1000, u64::MAX, true, 0, &log));
        scheduler.schedule(task("due", 100, u64::MAX, true, 9, &log));

        match scheduler.get_next(Timestamp::from_millis(100)) {
            NextTask::Ready(handle) => {
                assert_eq!(expiration_of(&handle), Timestamp::from_millis(100));
            }
            _ => panic!("expected a ready task"),
        }
        assert_eq!(scheduler.num_pending(), 1);
    }

    #[test]
    fn test_priority_breaks_ties_among_expired() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("low", 100, u64::MAX, true, 5, &log));
        scheduler.schedule(task("high", 100, u64::MAX, true, 1, &log));

        match scheduler.get_next(Timestamp::from_millis(200)) {
            NextTask::Ready(handle) => {
                assert_eq!(handle.borrow().priority(), TaskPriority(1));
            }
            _ => panic!("expected a ready task"),
        }
    }

    #[test]
    fn test_earlier_expiration_breaks_priority_ties() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("second", 150, u64::MAX, true, 3, &log));
        scheduler.schedule(task("first", 100, u64::MAX, true, 3, &log));

        match scheduler.get_next(Timestamp::from_millis(200)) {
            NextTask::Ready(handle) => {
                assert_eq!(expiration_of(&handle), Timestamp::from_millis(100));
            }
            _ => panic!("expected a ready task"),
        }
    }

    #[test]
    fn test_insertion_order_breaks_full_ties() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = task("first", 100, u64::MAX, true, 3, &log);
        let second = task("second", 100, u64::MAX, true, 3, &log);
        scheduler.schedule(first.clone());
        scheduler.schedule(second);

        match scheduler.get_next(Timestamp::from_millis(200)) {
            NextTask::Ready(handle) => assert!(Rc::ptr_eq(&handle, &first)),
            _ => panic!("expected a ready task"),
        }
    }

    #[test]
    fn test_start_timeout_sweeps_non_recurring() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("a", 0, 1_000, false, 0, &log));
        scheduler.schedule(task("b", 0, 1_010, false, 0, &log));
        scheduler.schedule(task("keeper", 0, 500, true, 0, &log));

        assert_eq!(
            scheduler.start_timeout_deadline(),
            Some(Timestamp::from_millis(1_000))
        );

        runtime.advance(Duration::from_millis(1_020));
        runtime.run_many();

        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(scheduler.num_pending(), 1);
        // recurring tasks never arm the start-timeout timer
        assert_eq!(scheduler.start_timeout_deadline(), None);
    }

    #[test]
    fn test_start_timeout_rearms_for_survivors() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("soon", 0, 100, false, 0, &log));
        scheduler.schedule(task("later", 0, 5_000, false, 0, &log));

        runtime.advance(Duration::from_millis(200));
        runtime.run_many();

        assert_eq!(*log.borrow(), vec!["soon"]);
        assert_eq!(
            scheduler.start_timeout_deadline(),
            Some(Timestamp::from_millis(5_000))
        );
    }

    #[test]
    fn test_shutdown_drops_tasks_without_callbacks() {
        let runtime = Runtime::new();
        let scheduler = MasterScheduler::new(&runtime);
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule(task("a", 0, 100, false, 0, &log));
        scheduler.shutdown();

        runtime.advance(Duration::from_secs(10));
        runtime.run_many();

        assert!(log.borrow().is_empty());
        assert_eq!(scheduler.num_pending(), 0);
        assert_eq!(scheduler.start_timeout_deadline(), None);
    }
}
