#![forbid(unsafe_code)]

//! `LifetimePool`: single-upstream fan-out of live lifetimes.
//!
//! The transducer (see [`crate::lifetime`]) is driven by expensive upstream
//! observation — a mutation observer on the page. The pool subscribes to it
//! **exactly once** for its whole life and caches the currently-live set, so
//! any number of consumers can come and go without re-running the
//! observation logic.
//!
//! # Design
//!
//! Each call to [`items`](LifetimePool::items) returns a fresh stream that,
//! from a deferred scheduler task (never synchronously, to avoid
//! double-delivery races with concurrently-arriving upstream events), emits
//! the members live *at that tick* in insertion order and then forwards all
//! future pool events.
//!
//! # Invariants
//!
//! 1. An item whose removal signal has fired is never replayed to a new
//!    subscriber.
//! 2. Unsubscribing one `items()` consumer affects neither other consumers
//!    nor the single upstream subscription.
//! 3. All shared-state mutation happens synchronously inside the pool's
//!    upstream callback and removal listeners; upstream errors flow through
//!    the stream's error channel, never a panic.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::lifetime::LifetimeItem;
use crate::scheduler::Scheduler;
use crate::stopper::SignalSubscription;
use crate::stream::{Bus, Never, Stream, StreamEvent, Subscription};

struct LiveEntry<T> {
    id: u64,
    item: LifetimeItem<T>,
    /// Listener on the item's removal signal; dropped with the entry.
    _removal_guard: Option<SignalSubscription>,
}

struct PoolState<T> {
    live: Vec<LiveEntry<T>>,
    ended: bool,
    next_entry_id: u64,
}

/// Caches the live set of a lifetime stream and fans it out to any number
/// of independent subscribers.
pub struct LifetimePool<T, E = Never> {
    state: Rc<RefCell<PoolState<T>>>,
    bus: Bus<LifetimeItem<T>, E>,
    scheduler: Scheduler,
    /// The one upstream subscription, held for the pool's entire life.
    _upstream: Subscription,
}

impl<T, E> std::fmt::Debug for LifetimePool<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LifetimePool")
            .field("live", &state.live.len())
            .field("ended", &state.ended)
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> LifetimePool<T, E> {
    /// Subscribe to `upstream` (exactly once) and start tracking.
    #[must_use]
    pub fn new(scheduler: &Scheduler, upstream: &Stream<LifetimeItem<T>, E>) -> Self {
        let state = Rc::new(RefCell::new(PoolState {
            live: Vec::new(),
            ended: false,
            next_entry_id: 0,
        }));
        let bus: Bus<LifetimeItem<T>, E> = Bus::new();

        let cb_state = Rc::clone(&state);
        let cb_bus = bus.clone();
        let upstream_sub = upstream.observe(move |ev| match ev {
            StreamEvent::Value(item) => Self::track(&cb_state, &cb_bus, item),
            StreamEvent::Error(e) => cb_bus.emit_error(e.clone()),
            StreamEvent::End => {
                cb_state.borrow_mut().ended = true;
                cb_bus.end();
            }
        });

        Self {
            state,
            bus,
            scheduler: scheduler.clone(),
            _upstream: upstream_sub,
        }
    }

    fn track(state: &Rc<RefCell<PoolState<T>>>, bus: &Bus<LifetimeItem<T>, E>, item: &LifetimeItem<T>) {
        let id = {
            let mut s = state.borrow_mut();
            s.next_entry_id += 1;
            let id = s.next_entry_id;
            s.live.push(LiveEntry {
                id,
                item: item.clone(),
                _removal_guard: None,
            });
            id
        };
        // Attach after insertion: if the removal already fired, the
        // listener runs synchronously here and evicts the entry again.
        let weak = Rc::downgrade(state);
        let guard = item.on_removal(move || {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().live.retain(|e| e.id != id);
            }
        });
        {
            let mut s = state.borrow_mut();
            if let Some(entry) = s.live.iter_mut().find(|e| e.id == id) {
                entry._removal_guard = Some(guard);
            }
        }
        bus.emit(item.clone());
    }

    /// Number of currently-live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Whether no items are currently live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().live.is_empty()
    }

    /// Whether the pool's upstream has ended.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.state.borrow().ended
    }

    /// A fresh subscription: the current members (replayed from a deferred
    /// scheduler task, in insertion order), then all future pool events.
    #[must_use]
    pub fn items(&self) -> Stream<LifetimeItem<T>, E> {
        let state = Rc::clone(&self.state);
        let bus_stream = self.bus.stream();
        let scheduler = self.scheduler.clone();
        Stream::from_source(move |emitter| {
            let cancelled = Rc::new(Cell::new(false));
            let forward_sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

            let tick_state = Rc::clone(&state);
            let tick_stream = bus_stream.clone();
            let tick_cancelled = Rc::clone(&cancelled);
            let tick_forward = Rc::clone(&forward_sub);
            scheduler.defer(move || {
                if tick_cancelled.get() {
                    return;
                }
                let members: Vec<LifetimeItem<T>> = tick_state
                    .borrow()
                    .live
                    .iter()
                    .map(|e| e.item.clone())
                    .collect();
                for m in members {
                    emitter.value(m);
                }
                if tick_state.borrow().ended {
                    emitter.end();
                    return;
                }
                // Same task as the replay: no events can slip in between.
                let sub = tick_stream.observe(move |ev| match ev {
                    StreamEvent::Value(v) => emitter.value(v.clone()),
                    StreamEvent::Error(e) => emitter.error(e.clone()),
                    StreamEvent::End => emitter.end(),
                });
                *tick_forward.borrow_mut() = Some(sub);
            });

            Some(Box::new(move || {
                cancelled.set(true);
                forward_sub.borrow_mut().take();
            }))
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::lifetimes;
    use crate::stream::Bus as StreamBus;

    type SnapshotBus = StreamBus<Vec<String>, Never>;

    fn setup() -> (Scheduler, SnapshotBus, LifetimePool<String, Never>) {
        let scheduler = Scheduler::lab();
        let bus: SnapshotBus = StreamBus::new();
        let pool = LifetimePool::new(&scheduler, &lifetimes(&bus.stream()));
        (scheduler, bus, pool)
    }

    fn record(
        stream: &Stream<LifetimeItem<String>, Never>,
    ) -> (Rc<RefCell<Vec<String>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let sub = stream.observe(move |ev| match ev {
            StreamEvent::Value(item) => {
                l.borrow_mut().push(format!("add {}", item.value()));
                let l2 = Rc::clone(&l);
                let v = item.value().clone();
                item.on_removal(move || l2.borrow_mut().push(format!("remove {v}")))
                    .forget();
            }
            StreamEvent::Error(e) => match *e {},
            StreamEvent::End => l.borrow_mut().push("end".to_string()),
        });
        (log, sub)
    }

    fn snap(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tracks_live_set() {
        let (_scheduler, bus, pool) = setup();
        assert!(pool.is_empty());
        bus.emit(snap(&["a", "b", "c"]));
        assert_eq!(pool.len(), 3);
        bus.emit(snap(&["b"]));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn replay_is_asynchronous() {
        let (scheduler, bus, pool) = setup();
        bus.emit(snap(&["a", "b"]));
        let (log, _sub) = record(&pool.items());
        // Nothing synchronously.
        assert!(log.borrow().is_empty());
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["add a", "add b"]);
    }

    #[test]
    fn late_subscriber_sees_current_members_then_same_future_events() {
        let (scheduler, bus, pool) = setup();
        let (early, _sub_early) = record(&pool.items());
        scheduler.run_until_idle();

        bus.emit(snap(&["a", "b", "c"]));
        let (late, _sub_late) = record(&pool.items());
        scheduler.run_until_idle();
        assert_eq!(*late.borrow(), vec!["add a", "add b", "add c"]);

        bus.emit(snap(&["a", "c", "d"]));
        assert_eq!(
            *early.borrow(),
            vec!["add a", "add b", "add c", "remove b", "add d"]
        );
        assert_eq!(
            *late.borrow(),
            vec!["add a", "add b", "add c", "remove b", "add d"]
        );
    }

    #[test]
    fn item_removed_before_tick_is_not_replayed() {
        let (scheduler, bus, pool) = setup();
        bus.emit(snap(&["a", "b"]));
        let (log, _sub) = record(&pool.items());
        // Removed between the items() call and the replay tick.
        bus.emit(snap(&["b"]));
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["add b"]);
    }

    #[test]
    fn unsubscribing_one_consumer_leaves_others_and_upstream_intact() {
        let (scheduler, bus, pool) = setup();
        let (log_a, sub_a) = record(&pool.items());
        let (log_b, _sub_b) = record(&pool.items());
        scheduler.run_until_idle();

        bus.emit(snap(&["x"]));
        sub_a.unsubscribe();
        bus.emit(snap(&["x", "y"]));
        scheduler.run_until_idle();

        assert_eq!(*log_a.borrow(), vec!["add x"]);
        assert_eq!(*log_b.borrow(), vec!["add x", "add y"]);
        // The pool itself is still tracking.
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn upstream_end_ends_all_consumers() {
        let (scheduler, bus, pool) = setup();
        let (log, _sub) = record(&pool.items());
        scheduler.run_until_idle();
        bus.emit(snap(&["a"]));
        bus.end();
        assert!(pool.has_ended());
        assert_eq!(
            *log.borrow(),
            vec!["add a", "remove a", "end"]
        );
    }

    #[test]
    fn items_on_ended_pool_delivers_end() {
        let (scheduler, bus, pool) = setup();
        bus.end();
        let (log, _sub) = record(&pool.items());
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["end"]);
    }

    #[test]
    fn firing_removal_through_any_clone_evicts_from_pool() {
        let (scheduler, bus, pool) = setup();
        let held: Rc<RefCell<Vec<LifetimeItem<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let h = Rc::clone(&held);
        let _sub = pool.items().on_value(move |item| h.borrow_mut().push(item.clone()));
        scheduler.run_until_idle();

        bus.emit(snap(&["a"]));
        assert_eq!(pool.len(), 1);
        // Fire through the consumer's clone, not the transducer.
        held.borrow()[0].removal().fire();
        assert!(pool.is_empty());
    }
}
