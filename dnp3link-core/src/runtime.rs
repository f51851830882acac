//! Single-threaded cooperative runtime
//!
//! Supplies monotonic time, a FIFO queue of posted actions, and single-shot
//! timers. Everything runs on the caller's thread when the runtime is driven
//! with [`Runtime::run_one`] / [`Runtime::run_many`]; nothing fires
//! spontaneously. A canceled timer's callback is removed synchronously, so
//! `cancel` guarantees the callback will not run after the call returns.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

/// A point on the runtime's monotonic clock, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The runtime's epoch
    pub const ZERO: Timestamp = Timestamp(0);

    /// Sentinel standing in for a deadline that never arrives
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Construct from milliseconds since the epoch
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Milliseconds since the epoch
    pub const fn millis(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

type Action = Box<dyn FnOnce()>;

struct TimerEntry {
    deadline: Timestamp,
    action: Option<Action>,
    allocated: bool,
}

struct Inner {
    now: Timestamp,
    ready: VecDeque<Action>,
    timers: Vec<TimerEntry>,
}

impl Inner {
    /// Index of the earliest due armed timer, if any
    fn next_due(&self) -> Option<usize> {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.action.is_some() && t.deadline <= self.now)
            .min_by_key(|(_, t)| t.deadline)
            .map(|(index, _)| index)
    }
}

/// Handle to a single-threaded cooperative runtime
///
/// Cloning is cheap and every clone refers to the same queue and clock. The
/// runtime is shared across many components; components must not block on it.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RefCell<Inner>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the clock at zero
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: Timestamp::ZERO,
                ready: VecDeque::new(),
                timers: Vec::new(),
            })),
        }
    }

    /// Current monotonic time
    pub fn now(&self) -> Timestamp {
        self.inner.borrow().now
    }

    /// Queue an action to run on the next `run_one`
    pub fn post(&self, action: impl FnOnce() + 'static) {
        self.inner.borrow_mut().ready.push_back(Box::new(action));
    }

    /// Allocate a single-shot timer
    pub fn timer(&self) -> Timer {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.timers.iter().position(|t| !t.allocated);
        let slot = match slot {
            Some(slot) => {
                inner.timers[slot].allocated = true;
                slot
            }
            None => {
                inner.timers.push(TimerEntry {
                    deadline: Timestamp::ZERO,
                    action: None,
                    allocated: true,
                });
                inner.timers.len() - 1
            }
        };
        Timer {
            inner: self.inner.clone(),
            slot,
        }
    }

    /// Move the clock forward; due timers fire on subsequent `run_one` calls
    pub fn advance(&self, duration: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.now = inner.now + duration;
    }

    /// Run one posted action, or one due timer callback if none are posted
    ///
    /// Returns false when there is nothing to run. The action executes after
    /// the internal state is released, so it may freely post, send, or
    /// rearm timers.
    pub fn run_one(&self) -> bool {
        let action = {
            let mut inner = self.inner.borrow_mut();
            match inner.ready.pop_front() {
                Some(action) => Some(action),
                None => inner
                    .next_due()
                    .and_then(|index| inner.timers[index].action.take()),
            }
        };

        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    /// Run posted actions and due timer callbacks until none remain
    pub fn run_many(&self) -> usize {
        let mut count = 0;
        while self.run_one() {
            count += 1;
        }
        count
    }

    /// Earliest deadline among armed timers, for embedders driving the loop
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner
            .borrow()
            .timers
            .iter()
            .filter(|t| t.action.is_some())
            .map(|t| t.deadline)
            .min()
    }
}

/// A single-shot timer owned by one component
///
/// `restart` replaces any pending callback; `cancel` removes it without
/// posting anything. Dropping the timer cancels it and frees its slot.
pub struct Timer {
    inner: Rc<RefCell<Inner>>,
    slot: usize,
}

impl Timer {
    /// Arm the timer, replacing any previously pending callback
    pub fn restart(&self, deadline: Timestamp, action: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        let entry = &mut inner.timers[self.slot];
        entry.deadline = deadline;
        entry.action = Some(Box::new(action));
    }

    /// Disarm the timer; the pending callback, if any, will never run
    pub fn cancel(&self) {
        self.inner.borrow_mut().timers[self.slot].action = None;
    }

    /// Deadline of the pending callback, if the timer is armed
    pub fn expires_at(&self) -> Option<Timestamp> {
        let inner = self.inner.borrow();
        let entry = &inner.timers[self.slot];
        entry.action.as_ref().map(|_| entry.deadline)
    }

    /// Whether a callback is pending
    pub fn is_armed(&self) -> bool {
        self.expires_at().is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        let entry = &mut inner.timers[self.slot];
        entry.action = None;
        entry.allocated = false;
    }
}
