#![forbid(unsafe_code)]

//! Wrapper membrane.
//!
//! Public API objects wrap internal driver objects. Handing out two
//! distinct wrappers for the same driver breaks consumer identity checks
//! (`ptr_eq`, map keys), so the membrane memoizes wrappers by driver ID.
//!
//! Entries hold weak references: the membrane never extends a wrapper's
//! life, and a dead entry is replaced transparently on the next request.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    // Weak<P> behind dyn Any; downcast against type_id on every hit.
    wrapper: Box<dyn Any>,
    // Liveness check that remembers P so pruning can work type-erased.
    is_live: Box<dyn Fn() -> bool>,
}

/// Identity-keyed memo of public wrappers over internal objects.
#[derive(Default)]
pub struct Membrane {
    entries: RefCell<AHashMap<u64, Entry>>,
}

impl Membrane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapper for `id`, building it with `make` on first request (or
    /// after the previous wrapper was dropped). Repeated calls while a
    /// wrapper is alive return the identical `Rc`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is live in the membrane under a different wrapper
    /// type; one driver has exactly one public face.
    pub fn wrap<P: 'static>(&self, id: u64, make: impl FnOnce() -> P) -> Rc<P> {
        {
            let entries = self.entries.borrow();
            if let Some(entry) = entries.get(&id) {
                if entry.type_id == TypeId::of::<P>() {
                    let weak = entry
                        .wrapper
                        .downcast_ref::<Weak<P>>()
                        .unwrap_or_else(|| unreachable!("type_id matched but downcast failed"));
                    if let Some(existing) = weak.upgrade() {
                        return existing;
                    }
                    // Dead entry; fall through and rebuild.
                } else if (entry.is_live)() {
                    panic!(
                        "membrane id {id} is live as {}, requested {}",
                        entry.type_name,
                        type_name::<P>()
                    );
                }
            }
        }
        let wrapper = Rc::new(make());
        let weak = Rc::downgrade(&wrapper);
        let liveness = weak.clone();
        self.entries.borrow_mut().insert(
            id,
            Entry {
                type_id: TypeId::of::<P>(),
                type_name: type_name::<P>(),
                wrapper: Box::new(weak),
                is_live: Box::new(move || liveness.strong_count() > 0),
            },
        );
        wrapper
    }

    /// Number of live entries; dead ones are pruned first.
    #[must_use]
    pub fn live_len(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, entry| (entry.is_live)());
        entries.len()
    }
}

impl std::fmt::Debug for Membrane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membrane")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}
