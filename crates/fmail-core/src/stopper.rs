#![forbid(unsafe_code)]

//! One-shot completion signals and their aggregate.
//!
//! A [`Stopper`] marks "this thing is over": it fires at most once and is
//! permanently inert afterwards. Element removal, view destruction, and
//! subscription teardown are all expressed as stoppers.
//!
//! [`StopperBus`] aggregates N independent stoppers into one downstream done
//! signal used to compose teardown: the bus's own signal fires exactly once,
//! only after every added input has fired, and it fires **asynchronously**
//! (from the scheduler queue) relative to the last input so a listener never
//! observes the bus's inputs in a half-updated state.
//!
//! # Invariants
//!
//! 1. `Stopper::fire` is idempotent; listeners run once, in registration
//!    order. A listener attached after firing runs synchronously at attach.
//! 2. `StopperBus` arms on its first `add`; an unarmed bus never completes.
//! 3. Adding an unfired signal while completion is queued (but not yet
//!    fired) disarms the queued completion.
//! 4. `StopperBus::add` after the done signal has fired is a usage error and
//!    panics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::scheduler::Scheduler;

/// RAII guard for a [`Stopper::on_fire`] listener. Same semantics as a
/// stream [`Subscription`](crate::stream::Subscription): drop removes the
/// listener, [`forget`](crate::stream::Subscription::forget) keeps it alive
/// unguarded.
pub use crate::stream::Subscription as SignalSubscription;

// ─── Stopper ─────────────────────────────────────────────────────────────────

struct ListenerEntry {
    id: u64,
    cb: RefCell<Option<Box<dyn FnOnce()>>>,
}

struct StopperInner {
    fired: Cell<bool>,
    listeners: RefCell<Vec<Rc<ListenerEntry>>>,
    next_id: Cell<u64>,
}

/// A one-shot signal: fires at most once, then stays permanently inert.
///
/// Cheaply cloneable; all clones share the same firing state.
pub struct Stopper {
    inner: Rc<StopperInner>,
}

impl Clone for Stopper {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Stopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopper")
            .field("fired", &self.inner.fired.get())
            .field("listeners", &self.inner.listeners.borrow().len())
            .finish()
    }
}

impl Stopper {
    /// Create an unfired stopper.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StopperInner {
                fired: Cell::new(false),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Whether the signal has fired.
    #[inline]
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.inner.fired.get()
    }

    /// Fire the signal. Idempotent: the second and later calls are no-ops.
    ///
    /// Listeners run synchronously in registration order. A listener that
    /// attaches another listener re-entrantly sees the fired state, so the
    /// new listener runs immediately.
    pub fn fire(&self) {
        if self.inner.fired.replace(true) {
            return;
        }
        let listeners: Vec<Rc<ListenerEntry>> =
            std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for entry in listeners {
            let cb = entry.cb.borrow_mut().take();
            if let Some(cb) = cb {
                cb();
            }
        }
    }

    /// Register a listener. If the signal has already fired, `cb` runs
    /// synchronously before this returns and the guard is inert.
    pub fn on_fire(&self, cb: impl FnOnce() + 'static) -> SignalSubscription {
        if self.inner.fired.get() {
            cb();
            return SignalSubscription::inert();
        }
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let entry = Rc::new(ListenerEntry {
            id,
            cb: RefCell::new(Some(Box::new(cb))),
        });
        self.inner.listeners.borrow_mut().push(entry);
        let inner = Rc::downgrade(&self.inner);
        SignalSubscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.borrow_mut().retain(|l| l.id != id);
            }
        })
    }
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

// ─── StopperBus ──────────────────────────────────────────────────────────────

struct BusState {
    /// Added signals that have not fired yet.
    pending: usize,
    /// Bumped on every `add`; a queued completion only fires if the epoch it
    /// captured is still current.
    epoch: u64,
    /// Live listener guards on the input signals.
    guards: Vec<SignalSubscription>,
}

/// Aggregates N one-shot signals into a single downstream done signal.
///
/// See the module docs for the completion contract.
pub struct StopperBus {
    state: Rc<RefCell<BusState>>,
    scheduler: Scheduler,
    done: Stopper,
}

impl std::fmt::Debug for StopperBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("StopperBus")
            .field("pending", &state.pending)
            .field("done", &self.done.has_fired())
            .finish()
    }
}

impl StopperBus {
    /// Create an empty (unarmed) bus. It completes only after at least one
    /// signal has been added and all added signals have fired.
    #[must_use]
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState {
                pending: 0,
                epoch: 0,
                guards: Vec::new(),
            })),
            scheduler: scheduler.clone(),
            done: Stopper::new(),
        }
    }

    /// Create a bus pre-loaded with `signals`.
    #[must_use]
    pub fn with_signals<'a>(
        scheduler: &Scheduler,
        signals: impl IntoIterator<Item = &'a Stopper>,
    ) -> Self {
        let bus = Self::new(scheduler);
        for s in signals {
            bus.add(s);
        }
        bus
    }

    /// The downstream done signal.
    #[must_use]
    pub fn done(&self) -> Stopper {
        self.done.clone()
    }

    /// Add an input signal.
    ///
    /// # Panics
    ///
    /// Panics if the bus has already completed (`StopperBus already done`).
    pub fn add(&self, signal: &Stopper) {
        assert!(!self.done.has_fired(), "StopperBus already done");
        {
            // Invalidate any queued completion; it re-queues below if the
            // bus is still fully fired.
            let mut state = self.state.borrow_mut();
            state.epoch += 1;
        }
        if signal.has_fired() {
            if self.state.borrow().pending == 0 {
                self.queue_completion();
            }
            return;
        }
        self.state.borrow_mut().pending += 1;
        let state = Rc::clone(&self.state);
        let scheduler = self.scheduler.clone();
        let done = self.done.clone();
        let guard = signal.on_fire(move || {
            let became_idle = {
                let mut s = state.borrow_mut();
                s.pending -= 1;
                s.pending == 0
            };
            if became_idle {
                Self::queue_completion_inner(&state, &scheduler, &done);
            }
        });
        self.state.borrow_mut().guards.push(guard);
    }

    fn queue_completion(&self) {
        Self::queue_completion_inner(&self.state, &self.scheduler, &self.done);
    }

    fn queue_completion_inner(state: &Rc<RefCell<BusState>>, scheduler: &Scheduler, done: &Stopper) {
        let epoch = state.borrow().epoch;
        let state = Rc::clone(state);
        let done = done.clone();
        scheduler.defer(move || {
            let still_idle = {
                let s = state.borrow();
                s.epoch == epoch && s.pending == 0
            };
            if still_idle && !done.has_fired() {
                state.borrow_mut().guards.clear();
                done.fire();
            }
        });
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
