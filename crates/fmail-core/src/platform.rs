#![forbid(unsafe_code)]

//! The explicit ambient context (`Platform`).
//!
//! Every component takes a `&Platform` (or the scheduler handle it carries)
//! at construction. There are no module-level singletons: the embedder
//! builds one `Platform`, owns its lifecycle, and tears it down by dropping
//! it.

use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::storage::KeyValueStorage;

/// The ambient context handed to component constructors.
#[derive(Clone)]
pub struct Platform {
    scheduler: Scheduler,
    storage: Option<Rc<dyn KeyValueStorage>>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("scheduler", &self.scheduler)
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

impl Platform {
    /// A real-clock platform with no storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            storage: None,
        }
    }

    /// A deterministic lab platform with no storage.
    #[must_use]
    pub fn lab() -> Self {
        Self {
            scheduler: Scheduler::lab(),
            storage: None,
        }
    }

    /// Attach a storage backend.
    #[must_use]
    pub fn with_storage(mut self, storage: Rc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The event-loop handle.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The storage backend, if any.
    #[must_use]
    pub fn storage(&self) -> Option<Rc<dyn KeyValueStorage>> {
        self.storage.clone()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}
