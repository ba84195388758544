#![forbid(unsafe_code)]

//! Cooperative event-loop handle (`Scheduler`).
//!
//! Everything in the FrankenMail stack runs single-threaded and event-driven:
//! mutation callbacks, timers, and deferred continuations interleave but never
//! run in parallel. `Scheduler` reifies that loop as an explicit value so
//! "asynchronously relative to X" is a testable statement instead of an
//! accident of the host environment.
//!
//! # Design
//!
//! `Scheduler` is cheaply cloneable (`Rc` inside). Work enters through two
//! doors:
//!
//! - [`defer`](Scheduler::defer): FIFO microtask queue, drained by
//!   [`run_until_idle`](Scheduler::run_until_idle).
//! - [`schedule`](Scheduler::schedule): cancelable timers, fired by
//!   [`tick`](Scheduler::tick) (real clock) or [`advance`](Scheduler::advance)
//!   (lab clock).
//!
//! # Deterministic testing via Lab
//!
//! [`Scheduler::lab`] installs a manually-advanceable clock: `advance` moves
//! time forward, firing due timers in deadline order (ties in schedule order)
//! and draining microtasks between timers. All `Instant`s come from
//! `web_time`, so the crate stays wasm-compatible.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use web_time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ─── Time source ─────────────────────────────────────────────────────────────

/// Fixed unix epoch for lab schedulers, so persisted timestamps are
/// reproducible across test runs.
const LAB_UNIX_EPOCH_MS: u64 = 1_600_000_000_000;

/// Time source abstraction for deterministic testing.
///
/// In production the scheduler uses `web_time::Instant::now()`.
/// In Lab mode, time is controlled via [`Scheduler::advance`].
#[derive(Debug, Clone)]
enum TimeSource {
    /// Real wall-clock time.
    Real,
    /// Deterministic lab clock: epoch plus a manually-advanced offset.
    Lab { epoch: Instant, offset_us: Rc<Cell<u64>> },
}

// ─── Inner shared state ──────────────────────────────────────────────────────

type Task = Box<dyn FnOnce()>;

struct TimerEntry {
    id: u64,
    deadline: Instant,
    task: Task,
}

struct SchedulerInner {
    queue: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<TimerEntry>>,
    next_timer_id: Cell<u64>,
    time: TimeSource,
}

impl SchedulerInner {
    fn now(&self) -> Instant {
        match &self.time {
            TimeSource::Real => Instant::now(),
            TimeSource::Lab { epoch, offset_us } => {
                *epoch + Duration::from_micros(offset_us.get())
            }
        }
    }

    /// Remove and return the next timer due at or before `limit`
    /// (earliest deadline first, ties broken by schedule order).
    fn take_next_due(&self, limit: Instant) -> Option<TimerEntry> {
        let mut timers = self.timers.borrow_mut();
        let mut best: Option<usize> = None;
        for (i, t) in timers.iter().enumerate() {
            if t.deadline > limit {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(j) => {
                    let b = &timers[j];
                    if (t.deadline, t.id) < (b.deadline, b.id) {
                        Some(i)
                    } else {
                        Some(j)
                    }
                }
            };
        }
        best.map(|i| timers.remove(i))
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Cooperative event-loop handle.
///
/// Cheaply cloneable; all clones share the same queue, timers, and clock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.inner.queue.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("lab", &self.is_lab())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler on the real wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_time(TimeSource::Real)
    }

    /// Create a deterministic lab scheduler. Time starts at a fixed epoch and
    /// only moves when [`advance`](Scheduler::advance) is called.
    #[must_use]
    pub fn lab() -> Self {
        Self::with_time(TimeSource::Lab {
            epoch: Instant::now(),
            offset_us: Rc::new(Cell::new(0)),
        })
    }

    fn with_time(time: TimeSource) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                queue: RefCell::new(VecDeque::new()),
                timers: RefCell::new(Vec::new()),
                next_timer_id: Cell::new(1),
                time,
            }),
        }
    }

    /// Whether this scheduler uses a lab clock.
    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self.inner.time, TimeSource::Lab { .. })
    }

    /// Current time according to this scheduler's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.now()
    }

    /// Current unix time in milliseconds (used for persisted timestamps).
    ///
    /// Lab schedulers report a fixed epoch plus the advanced offset, so
    /// persisted data is reproducible in tests.
    #[must_use]
    pub fn now_unix_ms(&self) -> u64 {
        match &self.inner.time {
            TimeSource::Real => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis()
                .min(u64::MAX as u128) as u64,
            TimeSource::Lab { offset_us, .. } => {
                LAB_UNIX_EPOCH_MS + offset_us.get() / 1_000
            }
        }
    }

    /// Queue a microtask. Tasks run in FIFO order during
    /// [`run_until_idle`](Scheduler::run_until_idle), [`tick`](Scheduler::tick),
    /// or [`advance`](Scheduler::advance).
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(f));
    }

    /// Queue a cancelable timer firing after `delay`.
    ///
    /// Dropping the returned [`TimerHandle`] does **not** cancel the timer —
    /// cancellation is always explicit.
    pub fn schedule(&self, delay: Duration, f: impl FnOnce() + 'static) -> TimerHandle {
        let id = self.inner.next_timer_id.get();
        self.inner.next_timer_id.set(id + 1);
        self.inner.timers.borrow_mut().push(TimerEntry {
            id,
            deadline: self.inner.now() + delay,
            task: Box::new(f),
        });
        TimerHandle {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Drain the microtask queue. Tasks queued while draining run in the
    /// same call.
    pub fn run_until_idle(&self) {
        loop {
            let task = self.inner.queue.borrow_mut().pop_front();
            match task {
                Some(t) => t(),
                None => break,
            }
        }
    }

    /// Fire timers due at the current clock reading, then drain microtasks.
    pub fn tick(&self) {
        self.run_until_idle();
        let now = self.inner.now();
        while let Some(timer) = self.inner.take_next_due(now) {
            (timer.task)();
            self.run_until_idle();
        }
    }

    /// Advance the lab clock by `delta`, firing due timers in deadline order
    /// (ties in schedule order) and draining microtasks between timers.
    ///
    /// # Panics
    ///
    /// Panics if called on a real-clock scheduler.
    pub fn advance(&self, delta: Duration) {
        let TimeSource::Lab { epoch, offset_us } = &self.inner.time else {
            panic!("Scheduler::advance called on a real-clock scheduler");
        };
        self.run_until_idle();
        let target_us = offset_us.get()
            + delta.as_micros().min(u64::MAX as u128) as u64;
        let target = *epoch + Duration::from_micros(target_us);
        while let Some(timer) = self.inner.take_next_due(target) {
            // Time jumps to each timer's deadline before it fires, so a
            // timer observing now() sees a consistent clock.
            let due_us = timer
                .deadline
                .checked_duration_since(*epoch)
                .unwrap_or(Duration::ZERO)
                .as_micros()
                .min(u64::MAX as u128) as u64;
            if due_us > offset_us.get() {
                offset_us.set(due_us);
            }
            (timer.task)();
            self.run_until_idle();
        }
        offset_us.set(target_us);
    }

    /// Number of queued microtasks (diagnostics).
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Number of pending timers (diagnostics).
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ─── TimerHandle ─────────────────────────────────────────────────────────────

/// Handle to a scheduled timer.
///
/// Cancellation is explicit via [`cancel`](TimerHandle::cancel); dropping the
/// handle leaves the timer armed.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    inner: Weak<SchedulerInner>,
}

impl TimerHandle {
    /// Cancel the timer. A no-op if it already fired or was cancelled.
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.timers.borrow_mut().retain(|t| t.id != self.id);
        }
    }

    /// Whether the timer is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.timers.borrow().iter().any(|t| t.id == self.id))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn defer_runs_in_fifo_order() {
        let s = Scheduler::lab();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            s.defer(move || log.borrow_mut().push(i));
        }
        s.run_until_idle();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_queued_while_draining_run_in_same_call() {
        let s = Scheduler::lab();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let s2 = s.clone();
            let log = log.clone();
            s.defer(move || {
                log.borrow_mut().push("outer");
                let log2 = log.clone();
                s2.defer(move || log2.borrow_mut().push("inner"));
            });
        }
        s.run_until_idle();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn advance_fires_timers_in_deadline_order() {
        let s = Scheduler::lab();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            s.schedule(Duration::from_millis(20), move || log.borrow_mut().push("b"));
        }
        {
            let log = log.clone();
            s.schedule(Duration::from_millis(10), move || log.borrow_mut().push("a"));
        }
        s.advance(Duration::from_millis(30));
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn advance_ties_fire_in_schedule_order() {
        let s = Scheduler::lab();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = log.clone();
            s.schedule(Duration::from_millis(5), move || log.borrow_mut().push(name));
        }
        s.advance(Duration::from_millis(5));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn advance_drains_microtasks_between_timers() {
        let s = Scheduler::lab();
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let s2 = s.clone();
            let log = log.clone();
            s.schedule(Duration::from_millis(1), move || {
                log.borrow_mut().push("timer1");
                let log2 = log.clone();
                s2.defer(move || log2.borrow_mut().push("micro"));
            });
        }
        {
            let log = log.clone();
            s.schedule(Duration::from_millis(2), move || log.borrow_mut().push("timer2"));
        }
        s.advance(Duration::from_millis(5));
        assert_eq!(*log.borrow(), vec!["timer1", "micro", "timer2"]);
    }

    #[test]
    fn timer_not_due_does_not_fire() {
        let s = Scheduler::lab();
        let fired = Rc::new(Cell::new(false));
        {
            let fired = fired.clone();
            s.schedule(Duration::from_millis(100), move || fired.set(true));
        }
        s.advance(Duration::from_millis(50));
        assert!(!fired.get());
        s.advance(Duration::from_millis(50));
        assert!(fired.get());
    }

    #[test]
    fn cancel_prevents_firing() {
        let s = Scheduler::lab();
        let fired = Rc::new(Cell::new(false));
        let handle = {
            let fired = fired.clone();
            s.schedule(Duration::from_millis(10), move || fired.set(true))
        };
        assert!(handle.is_pending());
        handle.cancel();
        assert!(!handle.is_pending());
        s.advance(Duration::from_millis(20));
        assert!(!fired.get());
    }

    #[test]
    fn dropping_handle_leaves_timer_armed() {
        let s = Scheduler::lab();
        let fired = Rc::new(Cell::new(false));
        {
            let fired = fired.clone();
            let _handle = s.schedule(Duration::from_millis(10), move || fired.set(true));
        }
        s.advance(Duration::from_millis(20));
        assert!(fired.get());
    }

    #[test]
    fn lab_clock_advances_with_timers() {
        let s = Scheduler::lab();
        let t0 = s.now();
        let observed = Rc::new(Cell::new(Duration::ZERO));
        {
            let s2 = s.clone();
            let observed = observed.clone();
            s.schedule(Duration::from_millis(10), move || {
                observed.set(s2.now().duration_since(t0));
            });
        }
        s.advance(Duration::from_millis(100));
        // The timer saw its own deadline, not the final target.
        assert_eq!(observed.get(), Duration::from_millis(10));
        assert_eq!(s.now().duration_since(t0), Duration::from_millis(100));
    }

    #[test]
    fn lab_unix_ms_is_reproducible() {
        let a = Scheduler::lab();
        let b = Scheduler::lab();
        assert_eq!(a.now_unix_ms(), b.now_unix_ms());
        a.advance(Duration::from_secs(3));
        assert_eq!(a.now_unix_ms(), b.now_unix_ms() + 3_000);
    }

    #[test]
    #[should_panic(expected = "real-clock scheduler")]
    fn advance_on_real_clock_panics() {
        Scheduler::new().advance(Duration::from_millis(1));
    }

    #[test]
    fn tick_fires_due_timers_on_real_clock() {
        let s = Scheduler::new();
        let fired = Rc::new(Cell::new(false));
        {
            let fired = fired.clone();
            s.schedule(Duration::ZERO, move || fired.set(true));
        }
        s.tick();
        assert!(fired.get());
    }
}
