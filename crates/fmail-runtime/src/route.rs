#![forbid(unsafe_code)]

//! Route-view state machine.
//!
//! Three external event sources — programmatic navigation, history pops, and
//! hash changes — are merged into one stream of [`NavEvent`]s. Each event is
//! classified into exactly one [`RouteKind`] and becomes a [`RouteView`].
//!
//! # Invariants
//!
//! 1. At most one live `RouteView` at any instant: the previous view is
//!    destroyed synchronously **before** the new view is exposed, so no
//!    consumer can ever observe two simultaneously-active views.
//! 2. A `Hash`-triggered event whose URL equals the currently-active URL is
//!    suppressed (the same user action also arrived as a `Pop`), so one
//!    navigation never constructs two views.
//! 3. Unrecognized patterns resolve to [`RouteKind::Unknown`] and are
//!    logged, never an error: route resolution failures must not crash
//!    navigation.
//!
//! Classification order: custom → foreign custom → native → unknown. A
//! foreign custom route is a hash pattern registered by a different consumer
//! of the same mechanism; we must neither claim nor break it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use fmail_core::platform::Platform;
use fmail_core::scheduler::Scheduler;
use fmail_core::stopper::{SignalSubscription, Stopper};
use fmail_core::stream::{Bus, Never, Stream, Subscription};
use tracing::{trace, warn};

// ─── Navigation events ───────────────────────────────────────────────────────

/// What produced a navigation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTrigger {
    /// Programmatic navigation (`goto`, link click handled by the SDK).
    Push,
    /// Browser history traversal (`popstate`).
    Pop,
    /// A `hashchange` without an accompanying pop.
    Hash,
}

/// One observed navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEvent {
    /// Full URL (or at minimum the hash fragment) after the navigation.
    pub url: String,
    /// Source of the event.
    pub trigger: NavTrigger,
}

// ─── Route patterns ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A `/`-separated route pattern. Segments starting with `:` capture a
/// named, percent-decoded parameter. The pattern string doubles as the
/// route ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a pattern such as `"thread/:threadId"`.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .map(|seg| match seg.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(seg.to_string()),
            })
            .collect();
        Self {
            source: pattern.to_string(),
            segments,
        }
    }

    /// The pattern string, used as the route ID.
    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.source
    }

    /// Number of `:param` segments.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count()
    }

    /// Match a hash path, yielding ordered `(name, value)` params.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (seg, part) in self.segments.iter().zip(&parts) {
            match seg {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push((name.clone(), percent_decode(part)));
                }
            }
        }
        Some(params)
    }

    /// Substitute positional `params` into the `:param` slots.
    ///
    /// # Panics
    ///
    /// Panics if `params.len()` differs from [`param_count`](Self::param_count);
    /// a caller-side bug.
    #[must_use]
    pub fn build(&self, params: &[&str]) -> String {
        assert_eq!(
            params.len(),
            self.param_count(),
            "route {:?} takes {} params, got {}",
            self.source,
            self.param_count(),
            params.len()
        );
        let mut next = 0usize;
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|seg| match seg {
                Segment::Literal(lit) => lit.clone(),
                Segment::Param(_) => {
                    let value = percent_encode(params[next]);
                    next += 1;
                    value
                }
            })
            .collect();
        parts.join("/")
    }
}

/// Percent-encode a param value into one path segment.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Decode `%XX` escapes; malformed escapes pass through untouched.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = bytes.get(i + 1..i + 3)
            && let Ok(hex) = std::str::from_utf8(hex)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ─── RouteView ───────────────────────────────────────────────────────────────

/// Classification of a navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// A route built into the host application.
    Native {
        route_id: String,
        params: Vec<(String, String)>,
    },
    /// A custom route registered with this router.
    Custom {
        route_id: String,
        params: Vec<(String, String)>,
    },
    /// A hash pattern registered by a different consumer of the same
    /// mechanism; ours to leave alone.
    ForeignCustom,
    /// Unparseable; logged, never an error.
    Unknown,
}

static NEXT_ROUTE_VIEW_ID: AtomicU64 = AtomicU64::new(1);

struct RouteViewInner {
    id: u64,
    url: String,
    kind: RouteKind,
    destroy: Stopper,
}

/// The currently-active (or a past) route. Cheaply cloneable handle.
#[derive(Clone)]
pub struct RouteView {
    inner: Rc<RouteViewInner>,
}

impl std::fmt::Debug for RouteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteView")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl RouteView {
    fn new(url: String, kind: RouteKind) -> Self {
        Self {
            inner: Rc::new(RouteViewInner {
                id: NEXT_ROUTE_VIEW_ID.fetch_add(1, Ordering::Relaxed),
                url,
                kind,
                destroy: Stopper::new(),
            }),
        }
    }

    /// Unique, monotonic view ID (for logging and the membrane).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The URL this view was constructed for.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The classification and its params.
    #[must_use]
    pub fn kind(&self) -> &RouteKind {
        &self.inner.kind
    }

    /// The route ID, for native and custom routes.
    #[must_use]
    pub fn route_id(&self) -> Option<&str> {
        match &self.inner.kind {
            RouteKind::Native { route_id, .. } | RouteKind::Custom { route_id, .. } => {
                Some(route_id)
            }
            _ => None,
        }
    }

    /// Ordered `(name, value)` params, empty for foreign/unknown routes.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        match &self.inner.kind {
            RouteKind::Native { params, .. } | RouteKind::Custom { params, .. } => params,
            _ => &[],
        }
    }

    /// Whether this view has been replaced by a later navigation.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroy.has_fired()
    }

    /// Listener on this view's destruction.
    pub fn on_destroy(&self, cb: impl FnOnce() + 'static) -> SignalSubscription {
        self.inner.destroy.on_fire(cb)
    }

    /// The destroy signal itself (for `take_until`-style composition).
    #[must_use]
    pub fn destroy_signal(&self) -> Stopper {
        self.inner.destroy.clone()
    }

    fn fire_destroy(&self) {
        self.inner.destroy.fire();
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Router construction options.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Patterns built into the host application.
    pub native_routes: Vec<String>,
    /// Patterns owned by other consumers of the same hash mechanism.
    pub foreign_routes: Vec<String>,
}

struct RouterState {
    custom: Vec<RoutePattern>,
    native: Vec<RoutePattern>,
    foreign: Vec<RoutePattern>,
    current: Option<RouteView>,
    current_url: Option<String>,
    /// Bumped per dispatch; detects a re-entrant dispatch from a destroy
    /// listener so the outer navigation yields to the newer one.
    generation: u64,
    views: Bus<RouteView, Never>,
    _nav_sub: Option<Subscription>,
}

/// Dispatches navigation into exactly one live [`RouteView`] at a time.
#[derive(Clone)]
pub struct Router {
    state: Rc<RefCell<RouterState>>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Router")
            .field("custom_routes", &state.custom.len())
            .field("current", &state.current)
            .finish()
    }
}

impl Router {
    /// Build a router over `platform` with the host's route tables.
    #[must_use]
    pub fn new(platform: &Platform, config: RouterConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(RouterState {
                custom: Vec::new(),
                native: config.native_routes.iter().map(|p| RoutePattern::parse(p)).collect(),
                foreign: config.foreign_routes.iter().map(|p| RoutePattern::parse(p)).collect(),
                current: None,
                current_url: None,
                generation: 0,
                views: Bus::new(),
                _nav_sub: None,
            })),
            scheduler: platform.scheduler().clone(),
        }
    }

    /// Register a custom route pattern. On overlap, the first registration
    /// wins; later duplicates are traced and ignored.
    pub fn register_custom_route(&self, pattern: &str) {
        let parsed = RoutePattern::parse(pattern);
        let mut state = self.state.borrow_mut();
        if state.custom.iter().any(|p| p.route_id() == parsed.route_id()) {
            trace!(route_id = pattern, "custom route already registered; first wins");
            return;
        }
        state.custom.push(parsed);
    }

    /// The stream of newly-exposed route views.
    #[must_use]
    pub fn route_views(&self) -> Stream<RouteView, Never> {
        self.state.borrow().views.stream()
    }

    /// The currently-active view, if any navigation has been dispatched.
    #[must_use]
    pub fn current_route(&self) -> Option<RouteView> {
        self.state.borrow().current.clone()
    }

    /// Drive the router from a merged navigation stream. The embedder merges
    /// its push/pop/hash sources (or attaches them pre-merged).
    pub fn attach_nav_stream(&self, nav: &Stream<NavEvent, Never>) {
        let state = Rc::downgrade(&self.state);
        let sub = nav.on_value(move |event| {
            if let Some(state) = state.upgrade() {
                dispatch_inner(&state, &event.url, event.trigger);
            }
        });
        self.state.borrow_mut()._nav_sub = Some(sub);
    }

    /// Process one navigation now.
    pub fn dispatch(&self, url: &str, trigger: NavTrigger) {
        dispatch_inner(&self.state, url, trigger);
    }

    /// Build a hash link for a registered custom route. Param values are
    /// percent-encoded into their segments.
    ///
    /// # Panics
    ///
    /// Panics if `route_id` is not a registered custom route, or if the
    /// param count does not match the pattern. Both are caller bugs.
    #[must_use]
    pub fn create_link(&self, route_id: &str, params: &[&str]) -> String {
        let state = self.state.borrow();
        let pattern = state
            .custom
            .iter()
            .find(|p| p.route_id() == route_id)
            .unwrap_or_else(|| panic!("unknown custom route ID: {route_id:?}"));
        format!("#{}", pattern.build(params))
    }

    /// Navigate to a registered custom route.
    ///
    /// # Panics
    ///
    /// Same conditions as [`create_link`](Self::create_link).
    pub fn goto(&self, route_id: &str, params: &[&str]) {
        let url = self.create_link(route_id, params);
        self.dispatch(&url, NavTrigger::Push);
    }

    /// The scheduler this router was built over.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// The hash path of a URL: everything after `#`, or the whole string for
/// bare fragments.
fn hash_path(url: &str) -> &str {
    match url.find('#') {
        Some(i) => &url[i + 1..],
        None => url,
    }
}

fn classify(state: &RouterState, path: &str) -> RouteKind {
    for pattern in &state.custom {
        if let Some(params) = pattern.matches(path) {
            return RouteKind::Custom {
                route_id: pattern.route_id().to_string(),
                params,
            };
        }
    }
    for pattern in &state.foreign {
        if pattern.matches(path).is_some() {
            return RouteKind::ForeignCustom;
        }
    }
    for pattern in &state.native {
        if let Some(params) = pattern.matches(path) {
            return RouteKind::Native {
                route_id: pattern.route_id().to_string(),
                params,
            };
        }
    }
    RouteKind::Unknown
}

fn dispatch_inner(state: &Rc<RefCell<RouterState>>, url: &str, trigger: NavTrigger) {
    // Dedup: a hashchange echoing the navigation a popstate already
    // delivered must not construct a second view.
    let (kind, views) = {
        let s = state.borrow();
        if trigger == NavTrigger::Hash && s.current_url.as_deref() == Some(url) {
            trace!(url, "duplicate hash navigation suppressed");
            return;
        }
        (classify(&s, hash_path(url)), s.views.clone())
    };
    if matches!(kind, RouteKind::Unknown) {
        warn!(url, "unrecognized route; treating as unknown");
    }

    // The new view exists but is unexposed until the old one is gone.
    let next = RouteView::new(url.to_string(), kind);

    let (previous, generation) = {
        let mut s = state.borrow_mut();
        s.generation += 1;
        s.current_url = Some(url.to_string());
        (s.current.take(), s.generation)
    };
    if let Some(previous) = previous {
        previous.fire_destroy();
    }

    {
        let mut s = state.borrow_mut();
        if s.generation != generation {
            // A destroy listener re-dispatched (redirect-on-exit). The
            // newer navigation owns the slot; this view is never exposed.
            return;
        }
        s.current = Some(next.clone());
    }
    views.emit(next);
}

// ─── Tests ───────────────────────────────────────────────────────────────────
