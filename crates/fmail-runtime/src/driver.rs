#![forbid(unsafe_code)]

//! View-driver plumbing shared by the concrete drivers in [`crate::drivers`].
//!
//! A driver wraps one tracked host element for as long as that element is
//! live. [`DriverCore`] carries the pieces every driver needs: a stable ID,
//! the wrapped subject, an event bus, a destroy signal, and a registry of
//! SDK-inserted elements to detach on teardown.
//!
//! # Invariants
//!
//! 1. Destruction happens exactly once, regardless of how many of its
//!    triggers (element removal, explicit `destroy`) fire.
//! 2. On destruction the event bus emits the driver's terminal event and
//!    then ends, in that order, before the destroy signal fires.
//! 3. Emitting through a destroyed core is a traced no-op, never a panic:
//!    late host callbacks are expected.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use fmail_core::lifetime::LifetimeItem;
use fmail_core::stopper::{SignalSubscription, Stopper};
use fmail_core::stream::{Bus, Never, Stream};
use tracing::trace;

// ─── Config ──────────────────────────────────────────────────────────────────

/// How a driver family releases SDK-inserted elements on teardown.
pub struct DriverConfig<El> {
    detach: Rc<dyn Fn(&El)>,
}

impl<El> Clone for DriverConfig<El> {
    fn clone(&self) -> Self {
        Self {
            detach: Rc::clone(&self.detach),
        }
    }
}

impl<El> DriverConfig<El> {
    /// Detach via `detach`, called once per owned element at destroy time.
    pub fn new(detach: impl Fn(&El) + 'static) -> Self {
        Self {
            detach: Rc::new(detach),
        }
    }

    /// A config that leaves owned elements in place.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }
}

impl<El> std::fmt::Debug for DriverConfig<El> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig").finish_non_exhaustive()
    }
}

// ─── DriverCore ──────────────────────────────────────────────────────────────

static NEXT_DRIVER_ID: AtomicU64 = AtomicU64::new(1);

struct CoreInner<S, Ev, El> {
    id: u64,
    subject: S,
    bus: Bus<Ev, Never>,
    destroy: Stopper,
    destroyed: Cell<bool>,
    owned: RefCell<Vec<El>>,
    terminal: RefCell<Option<Ev>>,
    config: DriverConfig<El>,
    _removal_guard: RefCell<Option<SignalSubscription>>,
}

/// Shared core of a concrete driver. Cheaply cloneable handle.
pub struct DriverCore<S, Ev, El> {
    inner: Rc<CoreInner<S, Ev, El>>,
}

impl<S, Ev, El> Clone for DriverCore<S, Ev, El> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S, Ev, El> std::fmt::Debug for DriverCore<S, Ev, El> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCore")
            .field("id", &self.inner.id)
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl<S, Ev, El> DriverCore<S, Ev, El> {
    /// Stable, monotonic driver ID (also the membrane key).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The wrapped host element.
    #[must_use]
    pub fn subject(&self) -> &S {
        &self.inner.subject
    }

    /// Fires once, when the driver is destroyed.
    #[must_use]
    pub fn destroy_signal(&self) -> Stopper {
        self.inner.destroy.clone()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl<S: Clone + 'static, Ev: Clone + 'static, El: 'static> DriverCore<S, Ev, El> {
    /// Build a core around a tracked element. The core destroys itself when
    /// the item's removal signal fires. `terminal` is the event emitted as
    /// the last value on the bus at destroy time.
    ///
    /// The removal listener keeps the core alive: a driver nobody retains a
    /// handle to still tears down (and emits its terminal event) when its
    /// element leaves the page.
    #[must_use]
    pub fn for_item(item: &LifetimeItem<S>, terminal: Ev, config: DriverConfig<El>) -> Self {
        let core = Self::detached(item.value().clone(), terminal, config);
        let inner = Rc::clone(&core.inner);
        let guard = item.on_removal(move || destroy_inner(&inner));
        *core.inner._removal_guard.borrow_mut() = Some(guard);
        if item.is_removed() {
            destroy_inner(&core.inner);
        }
        core
    }

    /// Build a core with no removal trigger; destruction is explicit.
    #[must_use]
    pub fn detached(subject: S, terminal: Ev, config: DriverConfig<El>) -> Self {
        Self {
            inner: Rc::new(CoreInner {
                id: NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed),
                subject,
                bus: Bus::new(),
                destroy: Stopper::new(),
                destroyed: Cell::new(false),
                owned: RefCell::new(Vec::new()),
                terminal: RefCell::new(Some(terminal)),
                config,
                _removal_guard: RefCell::new(None),
            }),
        }
    }

    /// This driver's event stream. Ends at destroy time, after the
    /// terminal event.
    #[must_use]
    pub fn events(&self) -> Stream<Ev, Never> {
        self.inner.bus.stream()
    }

    /// Register an SDK-inserted element for detachment at destroy time.
    pub fn own_element(&self, element: El) {
        if self.inner.destroyed.get() {
            // Already torn down; release immediately.
            (self.inner.config.detach)(&element);
            return;
        }
        self.inner.owned.borrow_mut().push(element);
    }

    /// Emit a driver event. A no-op after destruction.
    pub fn emit(&self, event: Ev) {
        if self.inner.destroyed.get() {
            trace!(driver_id = self.inner.id, "event after destroy dropped");
            return;
        }
        self.inner.bus.emit(event);
    }

    /// Tear the driver down now. Idempotent.
    pub fn destroy(&self) {
        destroy_inner(&self.inner);
    }
}

fn destroy_inner<S, Ev: Clone + 'static, El>(inner: &Rc<CoreInner<S, Ev, El>>) {
    if inner.destroyed.replace(true) {
        return;
    }
    if let Some(terminal) = inner.terminal.borrow_mut().take() {
        inner.bus.emit(terminal);
    }
    inner.bus.end();
    inner.destroy.fire();
    let owned: Vec<El> = inner.owned.borrow_mut().drain(..).collect();
    for element in &owned {
        (inner.config.detach)(element);
    }
    // Unhook from the removal signal so it no longer pins this core.
    let guard = inner._removal_guard.borrow_mut().take();
    drop(guard);
}

/// Lift a stream of tracked items into a stream of drivers, one per item.
pub fn drivers_from<S, D, E>(
    items: &Stream<LifetimeItem<S>, E>,
    make: impl Fn(&LifetimeItem<S>) -> D + 'static,
) -> Stream<D, E>
where
    S: Clone + 'static,
    D: 'static,
    E: Clone + 'static,
{
    items.map(make)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
