#![forbid(unsafe_code)]

//! Page observation glue: mutation batches → snapshots → lifetime pools.
//!
//! The embedder supplies a mutation-observation primitive as a stream of
//! [`MutationBatch`]es. This module folds those batches into full snapshots
//! of "what exists right now" and feeds them through the core transducer, so
//! detaching the observer is a single unsubscription.
//!
//! Host-markup details (selectors, which nodes to watch) stay with the
//! caller; the element type `T` here is whatever handle the embedder uses.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use fmail_core::lifetime::{LifetimeItem, lifetimes};
use fmail_core::pool::LifetimePool;
use fmail_core::scheduler::Scheduler;
use fmail_core::stream::{Stream, StreamEvent};

// ─── Types ───────────────────────────────────────────────────────────────────

/// One batch of observed page changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutationBatch<T> {
    /// Elements that appeared, in document order.
    pub added: Vec<T>,
    /// Elements that disappeared.
    pub removed: Vec<T>,
}

/// Failure reported by the upstream observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The mutation observer itself failed.
    Observer(String),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observer(msg) => write!(f, "mutation observer failed: {msg}"),
        }
    }
}

impl std::error::Error for WatchError {}

// ─── Snapshot folding ────────────────────────────────────────────────────────

/// Fold mutation batches into full snapshots.
///
/// On activation the stream emits the deduplicated `initial` snapshot, then
/// one snapshot per batch: removals applied first, additions appended in
/// batch order, duplicates ignored. Errors and `End` pass through.
///
/// Each activation re-seeds from `initial` and re-subscribes to
/// `mutations`; the observer contract is re-established per subscription.
pub fn snapshots<T>(
    initial: Vec<T>,
    mutations: &Stream<MutationBatch<T>, WatchError>,
) -> Stream<Vec<T>, WatchError>
where
    T: Clone + Eq + Hash + 'static,
{
    let mutations = mutations.clone();
    Stream::from_source(move |emitter| {
        let mut seed: Vec<T> = Vec::with_capacity(initial.len());
        for v in &initial {
            if !seed.contains(v) {
                seed.push(v.clone());
            }
        }
        emitter.value(seed.clone());

        let current = Rc::new(RefCell::new(seed));
        let sub = mutations.observe(move |ev| match ev {
            StreamEvent::Value(batch) => {
                {
                    let mut cur = current.borrow_mut();
                    cur.retain(|v| !batch.removed.contains(v));
                    for v in &batch.added {
                        if !cur.contains(v) {
                            cur.push(v.clone());
                        }
                    }
                }
                let snapshot = current.borrow().clone();
                emitter.value(snapshot);
            }
            StreamEvent::Error(e) => emitter.error(e.clone()),
            StreamEvent::End => emitter.end(),
        });
        Some(Box::new(move || drop(sub)))
    })
}

/// `snapshots` piped through the core transducer: one lifetime per element.
pub fn watch_elements<T>(
    initial: Vec<T>,
    mutations: &Stream<MutationBatch<T>, WatchError>,
) -> Stream<LifetimeItem<T>, WatchError>
where
    T: Clone + Eq + Hash + 'static,
{
    lifetimes(&snapshots(initial, mutations))
}

/// `watch_elements` cached in a [`LifetimePool`]: observation is set up
/// once, consumers fan out.
#[must_use]
pub fn element_pool<T>(
    scheduler: &Scheduler,
    initial: Vec<T>,
    mutations: &Stream<MutationBatch<T>, WatchError>,
) -> LifetimePool<T, WatchError>
where
    T: Clone + Eq + Hash + 'static,
{
    LifetimePool::new(scheduler, &watch_elements(initial, mutations))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fmail_core::stream::Bus;

    fn batch(added: &[&str], removed: &[&str]) -> MutationBatch<String> {
        MutationBatch {
            added: added.iter().map(|s| s.to_string()).collect(),
            removed: removed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn emits_initial_snapshot_on_activation() {
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let snaps = snapshots(names(&["a", "b"]), &bus.stream());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let _sub = snaps.on_value(move |s| l.borrow_mut().push(s.clone()));
        assert_eq!(*log.borrow(), vec![names(&["a", "b"])]);
    }

    #[test]
    fn folds_batches_removals_then_additions() {
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let snaps = snapshots(names(&["a", "b"]), &bus.stream());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let _sub = snaps.on_value(move |s| l.borrow_mut().push(s.clone()));

        bus.emit(batch(&["c"], &["a"]));
        bus.emit(batch(&["b"], &[])); // duplicate add ignored
        assert_eq!(
            *log.borrow(),
            vec![
                names(&["a", "b"]),
                names(&["b", "c"]),
                names(&["b", "c"]),
            ]
        );
    }

    #[test]
    fn initial_duplicates_are_dropped() {
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let snaps = snapshots(names(&["a", "a", "b"]), &bus.stream());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let _sub = snaps.on_value(move |s| l.borrow_mut().push(s.clone()));
        assert_eq!(*log.borrow(), vec![names(&["a", "b"])]);
    }

    #[test]
    fn observer_error_propagates_without_clearing_state() {
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let snaps = snapshots(names(&["a"]), &bus.stream());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let _sub = snaps.observe(move |ev| match ev {
            StreamEvent::Value(s) => l.borrow_mut().push(format!("snap {}", s.join(","))),
            StreamEvent::Error(e) => l.borrow_mut().push(format!("error {e}")),
            StreamEvent::End => l.borrow_mut().push("end".into()),
        });

        bus.emit_error(WatchError::Observer("disconnected".into()));
        bus.emit(batch(&["b"], &[]));
        assert_eq!(
            *log.borrow(),
            vec![
                "snap a".to_string(),
                "error mutation observer failed: disconnected".to_string(),
                "snap a,b".to_string(),
            ]
        );
    }

    #[test]
    fn element_pool_tracks_through_batches() {
        let scheduler = Scheduler::lab();
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let pool = element_pool(&scheduler, names(&["a"]), &bus.stream());
        assert_eq!(pool.len(), 1);
        bus.emit(batch(&["b", "c"], &["a"]));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn watch_elements_yields_lifetimes_with_removal() {
        let bus: Bus<MutationBatch<String>, WatchError> = Bus::new();
        let elements = watch_elements(names(&["a"]), &bus.stream());
        let removed = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&removed);
        let _sub = elements.on_value(move |item| {
            let r2 = Rc::clone(&r);
            let v = item.value().clone();
            item.on_removal(move || r2.borrow_mut().push(v)).forget();
        });
        bus.emit(batch(&[], &["a"]));
        assert_eq!(*removed.borrow(), vec!["a".to_string()]);
    }
}
