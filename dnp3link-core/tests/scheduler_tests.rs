//! Master scheduler integration tests

use dnp3link_core::runtime::{Runtime, Timestamp};
use dnp3link_core::scheduler::{MasterScheduler, MasterTask, NextTask, TaskPriority};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TaskEvents {
    starts: usize,
    responses: usize,
    start_timeouts: usize,
    failures: usize,
}

struct PollTask {
    name: &'static str,
    expiration: Timestamp,
    start_expiration: Timestamp,
    recurring: bool,
    priority: TaskPriority,
    events: TaskEvents,
    timeout_order: Rc<RefCell<Vec<&'static str>>>,
}

impl PollTask {
    fn new(
        name: &'static str,
        expiration: u64,
        start_expiration: u64,
        recurring: bool,
        priority: u8,
        timeout_order: &Rc<RefCell<Vec<&'static str>>>,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name,
            expiration: Timestamp::from_millis(expiration),
            start_expiration: Timestamp::from_millis(start_expiration),
            recurring,
            priority: TaskPriority(priority),
            events: TaskEvents::default(),
            timeout_order: timeout_order.clone(),
        }))
    }
}

impl MasterTask for PollTask {
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

    fn on_start(&mut self) {
        self.events.starts += 1;
    }

    fn on_response(&mut self, _now: Timestamp) {
        self.events.responses += 1;
    }

    fn on_start_timeout(&mut self, _now: Timestamp) {
        self.events.start_timeouts += 1;
        self.timeout_order.borrow_mut().push(self.name);
    }

    fn on_failure(&mut self, _now: Timestamp) {
        self.events.failures += 1;
    }
}

// Spec scenario: two non-recurring tasks swept together past their start
// expirations, leaving the pool empty and the timer disarmed
#[test]
fn test_start_timeout_sweeps_both_tasks() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let a = PollTask::new("a", 0, 1_000, false, 0, &order);
    let b = PollTask::new("b", 0, 1_010, false, 0, &order);
    scheduler.schedule(a.clone());
    scheduler.schedule(b.clone());

    runtime.advance(Duration::from_millis(1_011));
    runtime.run_many();

    assert_eq!(a.borrow().events.start_timeouts, 1);
    assert_eq!(b.borrow().events.start_timeouts, 1);
    assert_eq!(*order.borrow(), vec!["a", "b"]);
    assert_eq!(scheduler.num_pending(), 0);
    assert_eq!(scheduler.start_timeout_deadline(), None);
}

// get_next returns a task iff one has expired, otherwise the earliest
// future expiration
#[test]
fn test_get_next_ready_iff_expired() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let poll = PollTask::new("poll", 300, u64::MAX, true, 2, &order);
    scheduler.schedule(poll.clone());

    match scheduler.get_next(Timestamp::from_millis(299)) {
        NextTask::Wait(deadline) => assert_eq!(deadline, Timestamp::from_millis(300)),
        _ => panic!("nothing should be due yet"),
    }

    let poll_handle: Rc<RefCell<dyn MasterTask>> = poll.clone();
    match scheduler.get_next(Timestamp::from_millis(300)) {
        NextTask::Ready(task) => {
            task.borrow_mut().on_start();
            assert!(Rc::ptr_eq(&task, &poll_handle));
        }
        _ => panic!("the task is due"),
    }

    assert_eq!(scheduler.num_pending(), 0);
    assert!(matches!(
        scheduler.get_next(Timestamp::from_millis(301)),
        NextTask::Idle
    ));
}

// A recurring task can be handed out, driven, and rescheduled by the glue
#[test]
fn test_recurring_task_round_trips_through_pool() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let poll = PollTask::new("poll", 100, u64::MAX, true, 2, &order);
    scheduler.schedule(poll.clone());

    let now = Timestamp::from_millis(100);
    let task = match scheduler.get_next(now) {
        NextTask::Ready(task) => task,
        _ => panic!("task is due"),
    };
    task.borrow_mut().on_start();
    task.borrow_mut().on_response(now);

    // glue reschedules the recurring task for its next period
    poll.borrow_mut().expiration = Timestamp::from_millis(1_100);
    scheduler.schedule(task);

    assert_eq!(scheduler.num_pending(), 1);
    assert_eq!(poll.borrow().events.starts, 1);
    assert_eq!(poll.borrow().events.responses, 1);

    match scheduler.get_next(Timestamp::from_millis(200)) {
        NextTask::Wait(deadline) => assert_eq!(deadline, Timestamp::from_millis(1_100)),
        _ => panic!("next period not yet due"),
    }
}

// Recurring tasks never start-time-out, even with a past start expiration
#[test]
fn test_recurring_tasks_exempt_from_start_timeout() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let recurring = PollTask::new("recurring", 0, 10, true, 0, &order);
    let oneshot = PollTask::new("oneshot", 0, 50, false, 0, &order);
    scheduler.schedule(recurring.clone());
    scheduler.schedule(oneshot.clone());

    runtime.advance(Duration::from_millis(100));
    runtime.run_many();

    assert_eq!(recurring.borrow().events.start_timeouts, 0);
    assert_eq!(oneshot.borrow().events.start_timeouts, 1);
    assert_eq!(scheduler.num_pending(), 1);
}

// Expired beats unexpired, priority rank decides among the expired
#[test]
fn test_selection_order_across_mixed_pool() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let future = PollTask::new("future", 10_000, u64::MAX, true, 0, &order);
    let due_low = PollTask::new("due_low", 50, u64::MAX, true, 7, &order);
    let due_high = PollTask::new("due_high", 80, u64::MAX, true, 1, &order);
    scheduler.schedule(future);
    scheduler.schedule(due_low);
    scheduler.schedule(due_high.clone());

    let now = Timestamp::from_millis(100);
    match scheduler.get_next(now) {
        NextTask::Ready(task) => {
            assert_eq!(task.borrow().priority(), TaskPriority(1));
        }
        _ => panic!("expired tasks are pending"),
    }
    assert_eq!(scheduler.num_pending(), 2);
}

// Scheduling recomputes the start-timeout timer immediately
#[test]
fn test_schedule_rearms_start_timeout_timer() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(PollTask::new("late", 0, 5_000, false, 0, &order));
    assert_eq!(
        scheduler.start_timeout_deadline(),
        Some(Timestamp::from_millis(5_000))
    );

    scheduler.schedule(PollTask::new("early", 0, 1_000, false, 0, &order));
    assert_eq!(
        scheduler.start_timeout_deadline(),
        Some(Timestamp::from_millis(1_000))
    );
}

// Shutdown drops everything silently
#[test]
fn test_shutdown_cancels_timer_and_pool() {
    let runtime = Runtime::new();
    let scheduler = MasterScheduler::new(&runtime);
    let order = Rc::new(RefCell::new(Vec::new()));

    let task = PollTask::new("doomed", 0, 100, false, 0, &order);
    scheduler.schedule(task.clone());
    scheduler.shutdown();

    runtime.advance(Duration::from_secs(60));
    runtime.run_many();

    assert_eq!(task.borrow().events, TaskEvents::default());
    assert_eq!(scheduler.num_pending(), 0);
    assert!(matches!(scheduler.get_next(Timestamp::MAX), NextTask::Idle));
}
