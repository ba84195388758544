#![forbid(unsafe_code)]

//! Toolbar driver.
//!
//! Wraps a host toolbar and owns the buttons the SDK inserts into it.
//! Buttons are registered by ID; a click report for an ID that was never
//! registered is logged and dropped, since the host occasionally replays
//! clicks for buttons that were already torn down.

use std::cell::RefCell;
use std::rc::Rc;

use fmail_core::lifetime::LifetimeItem;
use fmail_core::stopper::Stopper;
use fmail_core::stream::{Never, Stream};
use tracing::warn;

use crate::driver::{DriverConfig, DriverCore};

/// Events observable on one toolbar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarEvent {
    /// A registered button was clicked.
    ButtonClicked { button_id: String },
    /// Terminal: the toolbar left the page. Always the last event.
    Destroyed,
}

/// Driver over one live toolbar element.
pub struct ToolbarDriver<El> {
    core: DriverCore<El, ToolbarEvent, El>,
    button_ids: Rc<RefCell<Vec<String>>>,
}

impl<El> Clone for ToolbarDriver<El> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            button_ids: Rc::clone(&self.button_ids),
        }
    }
}

impl<El: Clone + 'static> ToolbarDriver<El> {
    #[must_use]
    pub fn new(item: &LifetimeItem<El>, config: DriverConfig<El>) -> Self {
        Self {
            core: DriverCore::for_item(item, ToolbarEvent::Destroyed, config),
            button_ids: Rc::new(RefCell::new(Vec::new())),
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

    /// Event stream; ends after [`ToolbarEvent::Destroyed`].
    #[must_use]
    pub fn events(&self) -> Stream<ToolbarEvent, Never> {
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

    /// Insert a button: the element is owned (detached at teardown) and
    /// the ID becomes clickable. Later registrations of the same ID are
    /// rejected with a warning.
    pub fn add_button(&self, button_id: &str, element: El) {
        {
            let mut ids = self.button_ids.borrow_mut();
            if ids.iter().any(|id| id == button_id) {
                warn!(button_id, "duplicate toolbar button ID ignored");
                return;
            }
            ids.push(button_id.to_string());
        }
        self.core.own_element(element);
    }

    /// Report a click. Unregistered IDs are logged and dropped.
    pub fn note_button_clicked(&self, button_id: &str) {
        if !self.button_ids.borrow().iter().any(|id| id == button_id) {
            warn!(button_id, "click for unregistered toolbar button dropped");
            return;
        }
        self.core.emit(ToolbarEvent::ButtonClicked {
            button_id: button_id.to_string(),
        });
    }

    pub fn destroy(&self) {
        self.core.destroy();
    }
}

impl<El> std::fmt::Debug for ToolbarDriver<El> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolbarDriver")
            .field("id", &self.core.id())
            .field("buttons", &self.button_ids.borrow().len())
            .field("destroyed", &self.core.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_clicks_flow_unregistered_drop() {
        let item = LifetimeItem::new("toolbar-el".to_string());
        let driver = ToolbarDriver::new(&item, DriverConfig::noop());
        driver.add_button("archive", "archive-btn".to_string());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = driver.events().on_value(move |ev| s.borrow_mut().push(ev.clone()));

        driver.note_button_clicked("archive");
        driver.note_button_clicked("missing");
        assert_eq!(
            *seen.borrow(),
            vec![ToolbarEvent::ButtonClicked {
                button_id: "archive".to_string(),
            }]
        );
    }

    #[test]
    fn buttons_detach_when_toolbar_leaves() {
        let detached = Rc::new(RefCell::new(Vec::new()));
        let d = Rc::clone(&detached);
        let item = LifetimeItem::new("toolbar-el".to_string());
        let driver = ToolbarDriver::new(
            &item,
            DriverConfig::new(move |el: &String| d.borrow_mut().push(el.clone())),
        );
        driver.add_button("archive", "archive-btn".to_string());
        driver.add_button("snooze", "snooze-btn".to_string());
        driver.add_button("archive", "dup-btn".to_string()); // rejected

        item.removal().fire();
        assert_eq!(*detached.borrow(), vec!["archive-btn", "snooze-btn"]);
        assert!(driver.is_destroyed());
    }
}
