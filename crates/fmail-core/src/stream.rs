#![forbid(unsafe_code)]

//! Push streams with activation-managed sources.
//!
//! The webmail page is observed, not polled: mutation batches, navigation
//! events, and lifetime events all arrive as pushes. This module is the small
//! stream layer those pushes flow through.
//!
//! # Design
//!
//! - [`StreamEvent`]: `Value | Error | End`. Errors are **non-terminal**
//!   (a subscription survives them); `End` is terminal and delivered exactly
//!   once.
//! - [`Stream`]: a clonable subscriber handle over shared
//!   `Rc<RefCell<..>>` state. [`observe`](Stream::observe) returns an RAII
//!   [`Subscription`]; dropping it unsubscribes promptly.
//! - [`Bus`]: the push side of a stream, for components that own their
//!   event production.
//! - [`Stream::from_source`]: activation-managed sources. The source closure
//!   runs when the subscriber count goes 0→1 and its returned cleanup runs
//!   when the count returns to 0 (or on `End`). Reactivation re-runs the
//!   source. This is how expensive upstream observation is torn down the
//!   moment nobody is listening.
//!
//! # Invariants
//!
//! 1. Delivery is synchronous, in subscription order.
//! 2. A subscriber currently being delivered to is skipped for a re-entrant
//!    event (logged at `trace`); everything else re-entrant — subscribing,
//!    unsubscribing, emitting on other streams — is allowed.
//! 3. Subscribing to an ended stream delivers `End` synchronously.
//! 4. Pushes after `End` are ignored.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

// ─── Events ──────────────────────────────────────────────────────────────────

/// Uninhabited error type for infallible streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Never {}

impl std::fmt::Display for Never {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {}
    }
}

/// One event on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent<T, E = Never> {
    /// A value.
    Value(T),
    /// A non-terminal error. The subscription stays live.
    Error(E),
    /// Terminal. Delivered exactly once; nothing follows.
    End,
}

// ─── Inner shared state ──────────────────────────────────────────────────────

type Callback<T, E> = Box<dyn FnMut(&StreamEvent<T, E>)>;
type SourceCleanup = Box<dyn FnOnce()>;
type SourceFn<T, E> = Box<dyn Fn(Emitter<T, E>) -> Option<SourceCleanup>>;

struct SubEntry<T, E> {
    id: u64,
    alive: Cell<bool>,
    /// `try_borrow_mut` failure here means re-entrant delivery; the
    /// subscriber is skipped for that event.
    callback: RefCell<Callback<T, E>>,
}

struct StreamInner<T, E> {
    subscribers: RefCell<Vec<Rc<SubEntry<T, E>>>>,
    next_sub_id: Cell<u64>,
    ended: Cell<bool>,
    source: Option<SourceFn<T, E>>,
    cleanup: RefCell<Option<SourceCleanup>>,
}

fn deliver<T, E>(inner: &StreamInner<T, E>, ev: &StreamEvent<T, E>) {
    if inner.ended.get() {
        return;
    }
    let is_end = matches!(ev, StreamEvent::End);
    if is_end {
        inner.ended.set(true);
    }
    // Snapshot so re-entrant (un)subscription can't invalidate iteration.
    let subs: Vec<Rc<SubEntry<T, E>>> = inner.subscribers.borrow().clone();
    for entry in subs {
        if !entry.alive.get() {
            continue;
        }
        match entry.callback.try_borrow_mut() {
            Ok(mut cb) => cb(ev),
            Err(_) => {
                trace!(sub_id = entry.id, "stream re-entrant delivery skipped");
            }
        }
    }
    if is_end {
        inner.subscribers.borrow_mut().clear();
        let cleanup = inner.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

// ─── Stream ──────────────────────────────────────────────────────────────────

/// Subscriber handle to a stream of [`StreamEvent`]s.
///
/// Cloning yields another handle to the same underlying stream.
pub struct Stream<T, E = Never> {
    inner: Rc<StreamInner<T, E>>,
}

impl<T, E> Clone for Stream<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for Stream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("ended", &self.inner.ended.get())
            .finish()
    }
}

impl<T: 'static, E: 'static> Stream<T, E> {
    /// Create a stream driven by an activation-managed source.
    ///
    /// `source` runs when the subscriber count goes 0→1, receives an
    /// [`Emitter`], and may return a cleanup that runs when the count drops
    /// back to 0 or the stream ends. A later resubscription re-runs `source`.
    pub fn from_source(
        source: impl Fn(Emitter<T, E>) -> Option<SourceCleanup> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(StreamInner {
                subscribers: RefCell::new(Vec::new()),
                next_sub_id: Cell::new(1),
                ended: Cell::new(false),
                source: Some(Box::new(source)),
                cleanup: RefCell::new(None),
            }),
        }
    }

    /// A stream that is already over: every subscriber gets `End` at once.
    #[must_use]
    pub fn ended() -> Self {
        let inner = Rc::new(StreamInner {
            subscribers: RefCell::new(Vec::new()),
            next_sub_id: Cell::new(1),
            ended: Cell::new(true),
            source: None,
            cleanup: RefCell::new(None),
        });
        Self { inner }
    }

    /// Whether the stream has ended.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.inner.ended.get()
    }

    /// Subscribe. Events are delivered synchronously in subscription order;
    /// the returned guard unsubscribes on drop.
    ///
    /// Subscribing to an ended stream delivers `End` synchronously and
    /// returns an inert subscription.
    pub fn observe(&self, mut cb: impl FnMut(&StreamEvent<T, E>) + 'static) -> Subscription {
        if self.inner.ended.get() {
            cb(&StreamEvent::End);
            return Subscription::inert();
        }
        let id = self.inner.next_sub_id.get();
        self.inner.next_sub_id.set(id + 1);
        let entry = Rc::new(SubEntry {
            id,
            alive: Cell::new(true),
            callback: RefCell::new(Box::new(cb) as Callback<T, E>),
        });
        let was_inactive = self.inner.subscribers.borrow().is_empty();
        self.inner.subscribers.borrow_mut().push(entry.clone());

        if was_inactive && self.inner.source.is_some() {
            self.activate();
        }

        // The guard pins the stream: a derived stream built as a temporary
        // stays alive (and its upstream subscription with it) for as long
        // as one of its subscriptions is held or forgotten. No cycle: the
        // inner never references its subscriptions' guards.
        let inner = Rc::clone(&self.inner);
        Subscription::new(move || {
            if !entry.alive.get() {
                return;
            }
            entry.alive.set(false);
            inner.subscribers.borrow_mut().retain(|s| s.id != entry.id);
            let inactive = inner.subscribers.borrow().is_empty();
            if inactive && !inner.ended.get() {
                let cleanup = inner.cleanup.borrow_mut().take();
                if let Some(cleanup) = cleanup {
                    cleanup();
                }
            }
        })
    }

    /// Subscribe to values only (errors and `End` are ignored).
    pub fn on_value(&self, mut cb: impl FnMut(&T) + 'static) -> Subscription {
        self.observe(move |ev| {
            if let StreamEvent::Value(v) = ev {
                cb(v);
            }
        })
    }

    fn activate(&self) {
        let Some(source) = &self.inner.source else {
            return;
        };
        let emitter = Emitter {
            inner: Rc::downgrade(&self.inner),
        };
        let cleanup = source(emitter);
        if self.inner.ended.get() {
            // Source ended the stream during activation; its cleanup runs now.
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        } else {
            *self.inner.cleanup.borrow_mut() = cleanup;
        }
    }

    /// Transform each value through `f`. Errors and `End` pass through.
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Stream<U, E>
    where
        E: Clone,
    {
        let upstream = self.clone();
        let f = Rc::new(f);
        Stream::from_source(move |emitter| {
            let f = Rc::clone(&f);
            let sub = upstream.observe(move |ev| match ev {
                StreamEvent::Value(v) => emitter.value(f(v)),
                StreamEvent::Error(e) => emitter.error(e.clone()),
                StreamEvent::End => emitter.end(),
            });
            Some(Box::new(move || drop(sub)))
        })
    }

    /// Merge two streams. The output ends when **both** inputs have ended.
    pub fn merge(&self, other: &Stream<T, E>) -> Stream<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let a = self.clone();
        let b = other.clone();
        Stream::from_source(move |emitter| {
            let ended = Rc::new(Cell::new(0u8));
            let forward = |emitter: Emitter<T, E>, ended: Rc<Cell<u8>>| {
                move |ev: &StreamEvent<T, E>| match ev {
                    StreamEvent::Value(v) => emitter.value(v.clone()),
                    StreamEvent::Error(e) => emitter.error(e.clone()),
                    StreamEvent::End => {
                        ended.set(ended.get() + 1);
                        if ended.get() == 2 {
                            emitter.end();
                        }
                    }
                }
            };
            let sub_a = a.observe(forward(emitter.clone(), Rc::clone(&ended)));
            let sub_b = b.observe(forward(emitter.clone(), Rc::clone(&ended)));
            Some(Box::new(move || {
                drop(sub_a);
                drop(sub_b);
            }))
        })
    }

    /// Pass values through until `stop` fires, then end.
    pub fn take_until(&self, stop: &crate::stopper::Stopper) -> Stream<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let upstream = self.clone();
        let stop = stop.clone();
        Stream::from_source(move |emitter| {
            let stop_emitter = emitter.clone();
            let stop_sub = stop.on_fire(move || stop_emitter.end());
            let sub = upstream.observe(move |ev| match ev {
                StreamEvent::Value(v) => emitter.value(v.clone()),
                StreamEvent::Error(e) => emitter.error(e.clone()),
                StreamEvent::End => emitter.end(),
            });
            Some(Box::new(move || {
                drop(stop_sub);
                drop(sub);
            }))
        })
    }
}

// ─── Emitter ─────────────────────────────────────────────────────────────────

/// Push side handed to an activation-managed source.
///
/// Holds a weak reference; emitting into a dropped stream is a no-op.
pub struct Emitter<T, E = Never> {
    inner: Weak<StreamInner<T, E>>,
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T, E> Emitter<T, E> {
    /// Emit a value.
    pub fn value(&self, v: T) {
        if let Some(inner) = self.inner.upgrade() {
            deliver(&inner, &StreamEvent::Value(v));
        }
    }

    /// Emit a non-terminal error.
    pub fn error(&self, e: E) {
        if let Some(inner) = self.inner.upgrade() {
            deliver(&inner, &StreamEvent::Error(e));
        }
    }

    /// End the stream. Subsequent pushes are ignored.
    pub fn end(&self) {
        if let Some(inner) = self.inner.upgrade() {
            deliver(&inner, &StreamEvent::End);
        }
    }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// The push side of an ordinary (non-source-managed) stream.
///
/// Components that own their event production hold a `Bus` and hand out
/// [`Bus::stream`] to consumers.
pub struct Bus<T, E = Never> {
    inner: Rc<StreamInner<T, E>>,
}

impl<T, E> Clone for Bus<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for Bus<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .field("ended", &self.inner.ended.get())
            .finish()
    }
}

impl<T: 'static, E: 'static> Bus<T, E> {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StreamInner {
                subscribers: RefCell::new(Vec::new()),
                next_sub_id: Cell::new(1),
                ended: Cell::new(false),
                source: None,
                cleanup: RefCell::new(None),
            }),
        }
    }

    /// The subscriber side of this bus.
    #[must_use]
    pub fn stream(&self) -> Stream<T, E> {
        Stream {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Push a value. Ignored after [`end`](Bus::end).
    pub fn emit(&self, v: T) {
        deliver(&self.inner, &StreamEvent::Value(v));
    }

    /// Push a non-terminal error. Ignored after [`end`](Bus::end).
    pub fn emit_error(&self, e: E) {
        deliver(&self.inner, &StreamEvent::Error(e));
    }

    /// End the stream. Idempotent.
    pub fn end(&self) {
        deliver(&self.inner, &StreamEvent::End);
    }

    /// Whether [`end`](Bus::end) has been called.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.inner.ended.get()
    }
}

impl<T: 'static, E: 'static> Default for Bus<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// RAII subscription guard. Dropping it unsubscribes promptly.
pub struct Subscription {
    unsub: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.unsub.is_some())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(unsub: impl FnOnce() + 'static) -> Self {
        Self {
            unsub: Some(Box::new(unsub)),
        }
    }

    /// A subscription that is already detached (e.g. on an ended stream).
    #[must_use]
    pub(crate) fn inert() -> Self {
        Self { unsub: None }
    }

    /// Unsubscribe now instead of at drop.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsub.take() {
            f();
        }
    }

    /// Keep the subscription alive for the rest of the stream's life,
    /// without holding a guard.
    ///
    /// Leaks the guard closure, which is what pins the stream; dropping it
    /// instead would let an otherwise-unowned stream be torn down.
    pub fn forget(mut self) {
        if let Some(unsub) = self.unsub.take() {
            std::mem::forget(unsub);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsub.take() {
            f();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stopper::Stopper;

    fn collect<T: Clone + 'static, E: Clone + 'static>(
        stream: &Stream<T, E>,
    ) -> (Rc<RefCell<Vec<StreamEvent<T, E>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = Rc::clone(&log);
        let sub = stream.observe(move |ev| log2.borrow_mut().push(ev.clone()));
        (log, sub)
    }

    #[test]
    fn bus_delivers_in_subscription_order() {
        let bus: Bus<i32> = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let _s1 = bus.stream().observe(move |ev| {
            if let StreamEvent::Value(v) = ev {
                l1.borrow_mut().push(("first", *v));
            }
        });
        let l2 = Rc::clone(&log);
        let _s2 = bus.stream().observe(move |ev| {
            if let StreamEvent::Value(v) = ev {
                l2.borrow_mut().push(("second", *v));
            }
        });
        bus.emit(7);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus: Bus<i32> = Bus::new();
        let (log, sub) = collect(&bus.stream());
        bus.emit(1);
        drop(sub);
        bus.emit(2);
        assert_eq!(*log.borrow(), vec![StreamEvent::Value(1)]);
    }

    #[test]
    fn errors_are_non_terminal() {
        let bus: Bus<i32, String> = Bus::new();
        let (log, _sub) = collect(&bus.stream());
        bus.emit(1);
        bus.emit_error("boom".to_string());
        bus.emit(2);
        assert_eq!(
            *log.borrow(),
            vec![
                StreamEvent::Value(1),
                StreamEvent::Error("boom".to_string()),
                StreamEvent::Value(2),
            ]
        );
    }

    #[test]
    fn end_is_terminal_and_pushes_after_are_ignored() {
        let bus: Bus<i32> = Bus::new();
        let (log, _sub) = collect(&bus.stream());
        bus.emit(1);
        bus.end();
        bus.emit(2);
        bus.end();
        assert_eq!(
            *log.borrow(),
            vec![StreamEvent::Value(1), StreamEvent::End]
        );
    }

    #[test]
    fn subscribing_to_ended_stream_delivers_end_synchronously() {
        let bus: Bus<i32> = Bus::new();
        bus.end();
        let (log, _sub) = collect(&bus.stream());
        assert_eq!(*log.borrow(), vec![StreamEvent::End]);
    }

    #[test]
    fn source_activates_on_first_subscriber_and_cleans_up_on_last() {
        let activations = Rc::new(Cell::new(0));
        let cleanups = Rc::new(Cell::new(0));
        let a = Rc::clone(&activations);
        let c = Rc::clone(&cleanups);
        let stream: Stream<i32> = Stream::from_source(move |_emitter| {
            a.set(a.get() + 1);
            let c = Rc::clone(&c);
            Some(Box::new(move || c.set(c.get() + 1)))
        });

        assert_eq!(activations.get(), 0);
        let s1 = stream.observe(|_| {});
        assert_eq!(activations.get(), 1);
        let s2 = stream.observe(|_| {});
        assert_eq!(activations.get(), 1);
        drop(s1);
        assert_eq!(cleanups.get(), 0);
        drop(s2);
        assert_eq!(cleanups.get(), 1);

        // Reactivation re-runs the source.
        let _s3 = stream.observe(|_| {});
        assert_eq!(activations.get(), 2);
    }

    #[test]
    fn source_emissions_reach_the_activating_subscriber() {
        let stream: Stream<i32> = Stream::from_source(|emitter| {
            emitter.value(1);
            emitter.value(2);
            None
        });
        let (log, _sub) = collect(&stream);
        assert_eq!(
            *log.borrow(),
            vec![StreamEvent::Value(1), StreamEvent::Value(2)]
        );
    }

    #[test]
    fn source_that_ends_during_activation_runs_its_cleanup() {
        let cleaned = Rc::new(Cell::new(false));
        let c = Rc::clone(&cleaned);
        let stream: Stream<i32> = Stream::from_source(move |emitter| {
            emitter.end();
            let c = Rc::clone(&c);
            Some(Box::new(move || c.set(true)))
        });
        let (log, _sub) = collect(&stream);
        assert_eq!(*log.borrow(), vec![StreamEvent::End]);
        assert!(cleaned.get());
    }

    #[test]
    fn end_runs_source_cleanup() {
        let cleaned = Rc::new(Cell::new(false));
        let c = Rc::clone(&cleaned);
        let emitter_slot: Rc<RefCell<Option<Emitter<i32>>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&emitter_slot);
        let stream: Stream<i32> = Stream::from_source(move |emitter| {
            *slot.borrow_mut() = Some(emitter);
            let c = Rc::clone(&c);
            Some(Box::new(move || c.set(true)))
        });
        let (_log, _sub) = collect(&stream);
        emitter_slot.borrow().as_ref().unwrap().end();
        assert!(cleaned.get());
    }

    #[test]
    fn reentrant_delivery_to_same_subscriber_is_skipped() {
        let bus: Bus<i32> = Bus::new();
        let bus2 = bus.stream();
        let bus_push = Rc::new(bus);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let b = Rc::clone(&bus_push);
        let _sub = bus2.observe(move |ev| {
            if let StreamEvent::Value(v) = ev {
                l.borrow_mut().push(*v);
                if *v == 1 {
                    // Re-entrant emit on the same bus; this subscriber is
                    // mid-delivery and must be skipped, not re-entered.
                    b.emit(99);
                }
            }
        });
        bus_push.emit(1);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn reentrant_unsubscribe_of_other_subscriber() {
        let bus: Bus<i32> = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let slot2 = Rc::clone(&slot);
        let l1 = Rc::clone(&log);
        let _s1 = bus.stream().observe(move |_| {
            l1.borrow_mut().push("first");
            // Kill the second subscriber mid-delivery.
            if let Some(sub) = slot2.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        let l2 = Rc::clone(&log);
        let s2 = bus.stream().observe(move |_| {
            l2.borrow_mut().push("second");
        });
        *slot.borrow_mut() = Some(s2);
        bus.emit(0);
        // Second subscriber was unsubscribed before its delivery.
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn map_transforms_values_and_forwards_end() {
        let bus: Bus<i32> = Bus::new();
        let doubled = bus.stream().map(|v| v * 2);
        let (log, _sub) = collect(&doubled);
        bus.emit(3);
        bus.end();
        assert_eq!(
            *log.borrow(),
            vec![StreamEvent::Value(6), StreamEvent::End]
        );
    }

    #[test]
    fn subscription_pins_a_temporary_derived_stream() {
        let bus: Bus<i32> = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        // The mapped stream is a temporary; only the guard holds it.
        let _sub = bus.stream().map(|v| v * 2).on_value(move |v| l.borrow_mut().push(*v));
        bus.emit(3);
        bus.emit(4);
        assert_eq!(*log.borrow(), vec![6, 8]);
    }

    #[test]
    fn forgotten_subscription_pins_a_temporary_derived_stream() {
        let bus: Bus<i32> = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        bus.stream()
            .map(|v| v + 1)
            .on_value(move |v| l.borrow_mut().push(*v))
            .forget();
        bus.emit(1);
        bus.emit(2);
        assert_eq!(*log.borrow(), vec![2, 3]);
    }

    #[test]
    fn merge_ends_only_after_both_inputs_end() {
        let a: Bus<i32> = Bus::new();
        let b: Bus<i32> = Bus::new();
        let merged = a.stream().merge(&b.stream());
        let (log, _sub) = collect(&merged);
        a.emit(1);
        b.emit(2);
        a.end();
        b.emit(3);
        b.end();
        assert_eq!(
            *log.borrow(),
            vec![
                StreamEvent::Value(1),
                StreamEvent::Value(2),
                StreamEvent::Value(3),
                StreamEvent::End,
            ]
        );
    }

    #[test]
    fn take_until_ends_when_stopper_fires() {
        let bus: Bus<i32> = Bus::new();
        let stop = Stopper::new();
        let taken = bus.stream().take_until(&stop);
        let (log, _sub) = collect(&taken);
        bus.emit(1);
        stop.fire();
        bus.emit(2);
        assert_eq!(
            *log.borrow(),
            vec![StreamEvent::Value(1), StreamEvent::End]
        );
    }

    #[test]
    fn take_until_with_already_fired_stopper_ends_immediately() {
        let bus: Bus<i32> = Bus::new();
        let stop = Stopper::new();
        stop.fire();
        let taken = bus.stream().take_until(&stop);
        let (log, _sub) = collect(&taken);
        assert_eq!(*log.borrow(), vec![StreamEvent::End]);
    }

    #[test]
    fn unsubscribing_one_consumer_leaves_others_intact() {
        let bus: Bus<i32> = Bus::new();
        let (log_a, sub_a) = collect(&bus.stream());
        let (log_b, _sub_b) = collect(&bus.stream());
        bus.emit(1);
        sub_a.unsubscribe();
        bus.emit(2);
        assert_eq!(*log_a.borrow(), vec![StreamEvent::Value(1)]);
        assert_eq!(
            *log_b.borrow(),
            vec![StreamEvent::Value(1), StreamEvent::Value(2)]
        );
    }
}
