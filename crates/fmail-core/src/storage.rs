#![forbid(unsafe_code)]

//! Key-value storage boundary.
//!
//! The ID cache persists through whatever the embedder provides — browser
//! `localStorage`, an extension storage area, or nothing at all. The trait is
//! deliberately infallible: a failing backend returns `None` on read and
//! drops the write, and the cache degrades to memory-only.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// String key-value storage with `localStorage` semantics.
pub trait KeyValueStorage {
    /// Read a value. `None` for missing keys or unreadable backends.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Write a value. Failing backends silently drop the write.
    fn set_item(&self, key: &str, value: &str);
}

/// In-memory storage: the canonical fallback and the test backend.
///
/// Cloning shares the underlying map, so two cache instances constructed
/// over clones see each other's writes (like two tabs sharing storage).
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    map: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys (diagnostics/tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.map.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.map
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }
}
