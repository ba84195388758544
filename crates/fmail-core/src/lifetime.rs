#![forbid(unsafe_code)]

//! `LifetimeItem` and the snapshot-to-lifetimes transducer.
//!
//! The page hands us *snapshots*: "these elements exist right now", at
//! irregular intervals. The transducer converts a stream of snapshots into a
//! stream of [`LifetimeItem`]s with set-difference semantics: one item per
//! distinct key first observed, whose removal signal fires when the key
//! disappears from a later snapshot.
//!
//! # Invariants
//!
//! 1. No key is ever added twice without an intervening removal.
//! 2. Within one snapshot, removals are fully processed before any addition
//!    is emitted, so "removed then re-added across snapshots" is observable
//!    as remove+add, never a silent no-op.
//! 3. Additions are emitted in the snapshot's iteration order; duplicate
//!    keys within one snapshot collapse to the first occurrence.
//! 4. Upstream `End` and downstream deactivation fire removals for every
//!    still-tracked item in tracking (insertion) order.
//! 5. Upstream errors are forwarded without touching tracked state.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashSet;

use crate::stopper::{SignalSubscription, Stopper};
use crate::stream::{Stream, StreamEvent};

// ─── LifetimeItem ────────────────────────────────────────────────────────────

/// A value paired with a one-shot removal signal.
///
/// Cloning shares the removal signal: firing it through any clone marks
/// every clone as removed.
pub struct LifetimeItem<T> {
    value: T,
    removal: Stopper,
}

impl<T: Clone> Clone for LifetimeItem<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            removal: self.removal.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LifetimeItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeItem")
            .field("value", &self.value)
            .field("removed", &self.removal.has_fired())
            .finish()
    }
}

impl<T> LifetimeItem<T> {
    /// Wrap `value` with a fresh, unfired removal signal.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            removal: Stopper::new(),
        }
    }

    /// The wrapped value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The removal signal.
    #[inline]
    #[must_use]
    pub fn removal(&self) -> &Stopper {
        &self.removal
    }

    /// Whether the removal signal has fired.
    #[inline]
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removal.has_fired()
    }

    /// Shorthand for `removal().on_fire(cb)`.
    pub fn on_removal(&self, cb: impl FnOnce() + 'static) -> SignalSubscription {
        self.removal.on_fire(cb)
    }
}

// ─── Transducer ──────────────────────────────────────────────────────────────

/// Insertion-ordered tracking map. N is small (elements visible on one
/// page), so a Vec scan beats hashing for lookups; the per-snapshot key set
/// is hashed.
type Tracked<K, T> = Rc<RefCell<Vec<(K, LifetimeItem<T>)>>>;

fn fire_all_tracked<K, T>(tracked: &Tracked<K, T>) {
    let drained: Vec<(K, LifetimeItem<T>)> = std::mem::take(&mut *tracked.borrow_mut());
    for (_, item) in drained {
        item.removal().fire();
    }
}

/// Convert a stream of snapshots into a stream of lifetimes, identifying
/// items by `key_fn` when object identity is unstable across snapshots.
///
/// See the module docs for the exact ordering contract.
pub fn lifetimes_by<T, K, E>(
    snapshots: &Stream<Vec<T>, E>,
    key_fn: impl Fn(&T) -> K + 'static,
) -> Stream<LifetimeItem<T>, E>
where
    T: Clone + 'static,
    K: Clone + Eq + Hash + 'static,
    E: Clone + 'static,
{
    let snapshots = snapshots.clone();
    let key_fn = Rc::new(key_fn);
    Stream::from_source(move |emitter| {
        let tracked: Tracked<K, T> = Rc::new(RefCell::new(Vec::new()));
        let key_fn = Rc::clone(&key_fn);
        let state = Rc::clone(&tracked);
        let sub = snapshots.observe(move |ev| match ev {
            StreamEvent::Value(snapshot) => {
                // First-occurrence-wins ordered key set for this snapshot.
                let mut present: AHashSet<K> = AHashSet::with_capacity(snapshot.len());
                let mut ordered: Vec<(K, &T)> = Vec::with_capacity(snapshot.len());
                for v in snapshot {
                    let k = key_fn(v);
                    if present.insert(k.clone()) {
                        ordered.push((k, v));
                    }
                }

                // Removals first: delete from tracking, then fire, so a
                // removal listener already sees consistent state.
                let removed: Vec<LifetimeItem<T>> = {
                    let mut t = state.borrow_mut();
                    let mut removed = Vec::new();
                    t.retain(|(k, item)| {
                        if present.contains(k) {
                            true
                        } else {
                            removed.push(item.clone());
                            false
                        }
                    });
                    removed
                };
                for item in &removed {
                    item.removal().fire();
                }

                // Additions in snapshot iteration order.
                for (k, v) in ordered {
                    let already = state.borrow().iter().any(|(tk, _)| *tk == k);
                    if already {
                        continue;
                    }
                    let item = LifetimeItem::new(v.clone());
                    state.borrow_mut().push((k, item.clone()));
                    emitter.value(item);
                }
            }
            StreamEvent::Error(e) => emitter.error(e.clone()),
            StreamEvent::End => {
                fire_all_tracked(&state);
                emitter.end();
            }
        });
        Some(Box::new(move || {
            drop(sub);
            fire_all_tracked(&tracked);
        }))
    })
}

/// [`lifetimes_by`] with the value itself as the key.
pub fn lifetimes<T, E>(snapshots: &Stream<Vec<T>, E>) -> Stream<LifetimeItem<T>, E>
where
    T: Clone + Eq + Hash + 'static,
    E: Clone + 'static,
{
    lifetimes_by(snapshots, |v: &T| v.clone())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
