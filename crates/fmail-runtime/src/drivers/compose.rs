#![forbid(unsafe_code)]

//! Compose-window driver.
//!
//! Tracks one compose window from the moment the host inserts it until it
//! leaves the page. Host callbacks report edits and send progress through
//! the `note_*` methods; consumers observe them as [`ComposeEvent`]s.

use fmail_core::lifetime::LifetimeItem;
use fmail_core::stopper::Stopper;
use fmail_core::stream::{Never, Stream};

use crate::driver::{DriverConfig, DriverCore};

/// Events observable on one compose window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeEvent {
    /// The draft body was edited.
    BodyChanged,
    /// A send was initiated.
    Sending,
    /// The send completed and the host assigned a draft ID.
    Sent { draft_id: String },
    /// The user discarded the draft.
    Discarded,
    /// Terminal: the compose window left the page or the driver was torn
    /// down. Always the last event.
    Destroyed,
}

/// Driver over one live compose window element.
pub struct ComposeDriver<El> {
    core: DriverCore<El, ComposeEvent, El>,
}

impl<El> Clone for ComposeDriver<El> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<El: Clone + 'static> ComposeDriver<El> {
    /// Wrap a tracked compose element. The driver destroys itself when the
    /// element's removal signal fires.
    #[must_use]
    pub fn new(item: &LifetimeItem<El>, config: DriverConfig<El>) -> Self {
        Self {
            core: DriverCore::for_item(item, ComposeEvent::Destroyed, config),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    /// The compose window element.
    #[must_use]
    pub fn element(&self) -> &El {
        self.core.subject()
    }

    /// Event stream; ends after [`ComposeEvent::Destroyed`].
    #[must_use]
    pub fn events(&self) -> Stream<ComposeEvent, Never> {
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

    /// Register an SDK-inserted element (a custom send button, say) for
    /// detachment when the compose window goes away.
    pub fn adopt_element(&self, element: El) {
        self.core.own_element(element);
    }

    pub fn note_body_changed(&self) {
        self.core.emit(ComposeEvent::BodyChanged);
    }

    pub fn note_sending(&self) {
        self.core.emit(ComposeEvent::Sending);
    }

    pub fn note_sent(&self, draft_id: &str) {
        self.core.emit(ComposeEvent::Sent {
            draft_id: draft_id.to_string(),
        });
    }

    pub fn note_discarded(&self) {
        self.core.emit(ComposeEvent::Discarded);
    }

    pub fn destroy(&self) {
        self.core.destroy();
    }
}

impl<El> std::fmt::Debug for ComposeDriver<El> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeDriver")
            .field("id", &self.core.id())
            .field("destroyed", &self.core.is_destroyed())
            .finish()
    }
}
