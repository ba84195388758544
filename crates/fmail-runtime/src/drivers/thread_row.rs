#![forbid(unsafe_code)]

//! Thread-row driver.
//!
//! One driver per visible row in a thread list. Rows churn constantly as
//! the list scrolls and refreshes, so this driver is deliberately small:
//! selection state, label changes, teardown.

use fmail_core::lifetime::LifetimeItem;
use fmail_core::stopper::Stopper;
use fmail_core::stream::{Never, Stream};

use crate::driver::{DriverConfig, DriverCore};

/// Events observable on one thread row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadRowEvent {
    /// The row's selection checkbox toggled.
    Selected { selected: bool },
    /// The set of labels rendered on the row changed.
    LabelsChanged { labels: Vec<String> },
    /// Terminal: the row left the list. Always the last event.
    Destroyed,
}

/// Driver over one live thread-row element.
pub struct ThreadRowDriver<El> {
    core: DriverCore<El, ThreadRowEvent, El>,
}

impl<El> Clone for ThreadRowDriver<El> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<El: Clone + 'static> ThreadRowDriver<El> {
    #[must_use]
    pub fn new(item: &LifetimeItem<El>, config: DriverConfig<El>) -> Self {
        Self {
            core: DriverCore::for_item(item, ThreadRowEvent::Destroyed, config),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    #[must_use]
    pub fn element(&self) -> &El {
        self.core.subject()
    }

    /// Event stream; ends after [`ThreadRowEvent::Destroyed`].
    #[must_use]
    pub fn events(&self) -> Stream<ThreadRowEvent, Never> {
        self.core.events()
    }

    #[must_use]
    pub fn destroy_signal(&self) -> Stopper {
        self.core.destroy_signal()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Register an SDK-inserted element (an inline label chip, say) for
    /// detachment when the row goes away.
    pub fn adopt_element(&self, element: El) {
        self.core.own_element(element);
    }

    pub fn note_selected(&self, selected: bool) {
        self.core.emit(ThreadRowEvent::Selected { selected });
    }

    pub fn note_labels(&self, labels: Vec<String>) {
        self.core.emit(ThreadRowEvent::LabelsChanged { labels });
    }

    pub fn destroy(&self) {
        self.core.destroy();
    }
}

impl<El> std::fmt::Debug for ThreadRowDriver<El> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRowDriver")
            .field("id", &self.core.id())
            .field("destroyed", &self.core.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn selection_and_labels_then_teardown() {
        let item = LifetimeItem::new("row-el".to_string());
        let driver = ThreadRowDriver::new(&item, DriverConfig::noop());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = driver.events().on_value(move |ev| s.borrow_mut().push(ev.clone()));

        driver.note_selected(true);
        driver.note_labels(vec!["work".into(), "urgent".into()]);
        driver.note_selected(false);
        item.removal().fire();

        assert_eq!(
            *seen.borrow(),
            vec![
                ThreadRowEvent::Selected { selected: true },
                ThreadRowEvent::LabelsChanged {
                    labels: vec!["work".into(), "urgent".into()],
                },
                ThreadRowEvent::Selected { selected: false },
                ThreadRowEvent::Destroyed,
            ]
        );
        assert!(driver.is_destroyed());
    }
}
