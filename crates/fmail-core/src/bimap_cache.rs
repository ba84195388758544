#![forbid(unsafe_code)]

//! `BiMapCache`: a persisted, bounded, bijective two-way ID cache.
//!
//! The webmail backend knows messages by two unrelated ID namespaces, and
//! translating between them costs a network round trip. This cache remembers
//! resolved pairs, shares one in-flight resolution among concurrent callers,
//! and persists through a [`KeyValueStorage`] so independent cache instances
//! (other tabs) converge on the same mapping.
//!
//! # Invariants
//!
//! 1. The cached mapping is a true bijection: no A maps to two Bs, no B to
//!    two As.
//! 2. At most one outstanding resolution per key per direction; concurrent
//!    callers for the same unresolved key join it.
//! 3. Resolution failures are rejected to every joined caller and then
//!    forgotten — no negative caching; the next call retries from scratch.
//! 4. Every persist reconciles with what is currently in storage (newest
//!    last-access wins per conflicting key) before overwriting, then drops
//!    entries older than `max_age` and beyond `max_limit` (oldest first).
//! 5. Corrupt or unreadable storage never throws: load failures are logged
//!    and treated as an empty cache.
//!
//! Callbacks are always invoked from the scheduler queue, for both hits and
//! misses, so callers observe one consistent asynchrony.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use web_time::Duration;

use crate::platform::Platform;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::storage::KeyValueStorage;

#[cfg(feature = "tracing")]
use crate::logging::warn;
#[cfg(not(feature = "tracing"))]
use crate::warn;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failure surfaced to a cache caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The supplied resolver rejected the lookup.
    ResolveFailed(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolveFailed(msg) => write!(f, "id resolution failed: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Cache construction options.
#[derive(Debug, Clone)]
pub struct BiMapCacheConfig {
    /// Storage key the persisted entry list lives under.
    pub storage_key: String,
    /// Entries not accessed for this long are dropped on persist.
    pub max_age: Duration,
    /// At most this many most-recently-used entries survive a persist.
    pub max_limit: usize,
    /// Delay between a mutation and the reconciling save it triggers.
    pub save_throttle: Duration,
}

impl Default for BiMapCacheConfig {
    fn default() -> Self {
        Self {
            storage_key: "fmail.idmap".to_string(),
            max_age: Duration::from_secs(60 * 60 * 24 * 30),
            max_limit: 1_000,
            save_throttle: Duration::from_secs(3),
        }
    }
}

// ─── Completer ───────────────────────────────────────────────────────────────

/// One-shot completion handle handed to a resolver.
///
/// The resolver may complete it at any later point. Completing twice is a
/// logged no-op.
pub struct Completer<V> {
    commit: Rc<RefCell<Option<Box<dyn FnOnce(Result<V, CacheError>)>>>>,
}

impl<V> Clone for Completer<V> {
    fn clone(&self) -> Self {
        Self {
            commit: Rc::clone(&self.commit),
        }
    }
}

impl<V> std::fmt::Debug for Completer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("completed", &self.commit.borrow().is_none())
            .finish()
    }
}

impl<V> Completer<V> {
    fn new(commit: impl FnOnce(Result<V, CacheError>) + 'static) -> Self {
        Self {
            commit: Rc::new(RefCell::new(Some(Box::new(commit)))),
        }
    }

    /// Complete successfully.
    pub fn resolve(&self, value: V) {
        self.finish(Ok(value));
    }

    /// Complete with a failure. The failure is rejected to every joined
    /// caller and then forgotten (no negative caching).
    pub fn reject(&self, message: impl Into<String>) {
        self.finish(Err(CacheError::ResolveFailed(message.into())));
    }

    fn finish(&self, result: Result<V, CacheError>) {
        let commit = self.commit.borrow_mut().take();
        match commit {
            Some(commit) => commit(result),
            None => {
                warn!("completer completed twice; ignoring");
            }
        }
    }
}

// ─── Persistence model ───────────────────────────────────────────────────────

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedEntry<A, B> {
    a: A,
    b: B,
    /// Last-access unix timestamp, milliseconds.
    t: u64,
}

// ─── Inner state ─────────────────────────────────────────────────────────────

type Waiters<V> = Vec<Box<dyn FnOnce(Result<V, CacheError>)>>;

struct CacheInner<A, B> {
    a_to_b: AHashMap<A, B>,
    b_to_a: AHashMap<B, A>,
    /// Last-access timestamps, keyed by the A side of each pair.
    last_access: AHashMap<A, u64>,
    in_flight_a: AHashMap<A, Waiters<B>>,
    in_flight_b: AHashMap<B, Waiters<A>>,
    save_timer: Option<TimerHandle>,
    scheduler: Scheduler,
    storage: Option<Rc<dyn KeyValueStorage>>,
    config: BiMapCacheConfig,
}

// ─── BiMapCache ──────────────────────────────────────────────────────────────

type Resolver<K, V> = Rc<dyn Fn(&K, Completer<V>)>;

/// Bidirectional, persisted, bounded ID translation cache.
pub struct BiMapCache<A, B> {
    inner: Rc<RefCell<CacheInner<A, B>>>,
    resolve_b: Resolver<A, B>,
    resolve_a: Resolver<B, A>,
}

impl<A, B> std::fmt::Debug for BiMapCache<A, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("BiMapCache")
            .field("entries", &inner.a_to_b.len())
            .field("in_flight_a", &inner.in_flight_a.len())
            .field("in_flight_b", &inner.in_flight_b.len())
            .finish()
    }
}

impl<A, B> BiMapCache<A, B>
where
    A: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
    B: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
{
    /// Build a cache over `platform`'s scheduler and storage.
    ///
    /// `resolve_b` answers A→B misses, `resolve_a` answers B→A misses. With
    /// no storage configured the cache is memory-only.
    #[must_use]
    pub fn new(
        platform: &Platform,
        config: BiMapCacheConfig,
        resolve_b: impl Fn(&A, Completer<B>) + 'static,
        resolve_a: impl Fn(&B, Completer<A>) + 'static,
    ) -> Self {
        let scheduler = platform.scheduler().clone();
        let storage = platform.storage();
        let now = scheduler.now_unix_ms();

        let mut inner = CacheInner {
            a_to_b: AHashMap::new(),
            b_to_a: AHashMap::new(),
            last_access: AHashMap::new(),
            in_flight_a: AHashMap::new(),
            in_flight_b: AHashMap::new(),
            save_timer: None,
            scheduler,
            storage,
            config,
        };
        let loaded = read_persisted::<A, B>(&inner.storage, &inner.config);
        let min_t = now.saturating_sub(inner.config.max_age.as_millis().min(u64::MAX as u128) as u64);
        for entry in loaded {
            if entry.t < min_t {
                continue;
            }
            inner.a_to_b.insert(entry.a.clone(), entry.b.clone());
            inner.b_to_a.insert(entry.b, entry.a.clone());
            inner.last_access.insert(entry.a, entry.t);
        }

        Self {
            inner: Rc::new(RefCell::new(inner)),
            resolve_b: Rc::new(resolve_b),
            resolve_a: Rc::new(resolve_a),
        }
    }

    /// Number of cached pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().a_to_b.len()
    }

    /// Whether no pairs are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().a_to_b.is_empty()
    }

    /// Translate A→B. `callback` is invoked from the scheduler queue.
    pub fn get_b_from_a(&self, a: &A, callback: impl FnOnce(Result<B, CacheError>) + 'static) {
        // Hit path.
        let hit = {
            let mut inner = self.inner.borrow_mut();
            if let Some(b) = inner.a_to_b.get(a).cloned() {
                let now = inner.scheduler.now_unix_ms();
                inner.last_access.insert(a.clone(), now);
                Some(b)
            } else {
                None
            }
        };
        if let Some(b) = hit {
            schedule_save(&self.inner);
            let scheduler = self.inner.borrow().scheduler.clone();
            scheduler.defer(move || callback(Ok(b)));
            return;
        }

        // Join an in-flight resolution if there is one.
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(waiters) = inner.in_flight_a.get_mut(a) {
                waiters.push(Box::new(callback));
                return;
            }
            inner.in_flight_a.insert(a.clone(), vec![Box::new(callback)]);
        }

        // Fresh miss: invoke the resolver exactly once for this key.
        let weak = Rc::downgrade(&self.inner);
        let key = a.clone();
        let completer = Completer::new(move |result: Result<B, CacheError>| {
            complete_a_to_b(&weak, &key, result);
        });
        (self.resolve_b)(a, completer);
    }

    /// Translate B→A. `callback` is invoked from the scheduler queue.
    pub fn get_a_from_b(&self, b: &B, callback: impl FnOnce(Result<A, CacheError>) + 'static) {
        let hit = {
            let mut inner = self.inner.borrow_mut();
            if let Some(a) = inner.b_to_a.get(b).cloned() {
                let now = inner.scheduler.now_unix_ms();
                inner.last_access.insert(a.clone(), now);
                Some(a)
            } else {
                None
            }
        };
        if let Some(a) = hit {
            schedule_save(&self.inner);
            let scheduler = self.inner.borrow().scheduler.clone();
            scheduler.defer(move || callback(Ok(a)));
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            if let Some(waiters) = inner.in_flight_b.get_mut(b) {
                waiters.push(Box::new(callback));
                return;
            }
            inner.in_flight_b.insert(b.clone(), vec![Box::new(callback)]);
        }

        let weak = Rc::downgrade(&self.inner);
        let key = b.clone();
        let completer = Completer::new(move |result: Result<A, CacheError>| {
            complete_b_to_a(&weak, &key, result);
        });
        (self.resolve_a)(b, completer);
    }

    /// Force the reconcile-persist step now (used at teardown).
    pub fn save_now(&self) {
        save_now(&self.inner);
    }
}

// ─── Resolution commit paths ─────────────────────────────────────────────────

fn complete_a_to_b<A, B>(
    weak: &Weak<RefCell<CacheInner<A, B>>>,
    key: &A,
    result: Result<B, CacheError>,
) where
    A: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
    B: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
{
    // A resolution outliving its cache is simply dropped.
    let Some(inner) = weak.upgrade() else { return };
    let (waiters, scheduler) = {
        let mut i = inner.borrow_mut();
        let waiters = i.in_flight_a.remove(key).unwrap_or_default();
        (waiters, i.scheduler.clone())
    };
    match result {
        Ok(b) => {
            commit_pair(&inner, key.clone(), b.clone());
            schedule_save(&inner);
            for waiter in waiters {
                let b = b.clone();
                scheduler.defer(move || waiter(Ok(b)));
            }
        }
        Err(e) => {
            for waiter in waiters {
                let e = e.clone();
                scheduler.defer(move || waiter(Err(e)));
            }
        }
    }
}

fn complete_b_to_a<A, B>(
    weak: &Weak<RefCell<CacheInner<A, B>>>,
    key: &B,
    result: Result<A, CacheError>,
) where
    A: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
    B: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
{
    let Some(inner) = weak.upgrade() else { return };
    let (waiters, scheduler) = {
        let mut i = inner.borrow_mut();
        let waiters = i.in_flight_b.remove(key).unwrap_or_default();
        (waiters, i.scheduler.clone())
    };
    match result {
        Ok(a) => {
            commit_pair(&inner, a.clone(), key.clone());
            schedule_save(&inner);
            for waiter in waiters {
                let a = a.clone();
                scheduler.defer(move || waiter(Ok(a)));
            }
        }
        Err(e) => {
            for waiter in waiters {
                let e = e.clone();
                scheduler.defer(move || waiter(Err(e)));
            }
        }
    }
}

/// Insert a pair, preserving bijection by evicting whatever each side
/// previously mapped to.
fn commit_pair<A, B>(inner: &Rc<RefCell<CacheInner<A, B>>>, a: A, b: B)
where
    A: Clone + Eq + Hash,
    B: Clone + Eq + Hash,
{
    let mut i = inner.borrow_mut();
    let now = i.scheduler.now_unix_ms();
    if let Some(old_b) = i.a_to_b.get(&a).cloned() {
        if old_b != b {
            i.b_to_a.remove(&old_b);
        }
    }
    if let Some(old_a) = i.b_to_a.get(&b).cloned() {
        if old_a != a {
            i.a_to_b.remove(&old_a);
            i.last_access.remove(&old_a);
        }
    }
    i.a_to_b.insert(a.clone(), b.clone());
    i.b_to_a.insert(b, a.clone());
    i.last_access.insert(a, now);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

fn read_persisted<A, B>(
    storage: &Option<Rc<dyn KeyValueStorage>>,
    config: &BiMapCacheConfig,
) -> Vec<PersistedEntry<A, B>>
where
    A: DeserializeOwned,
    B: DeserializeOwned,
{
    let Some(storage) = storage else {
        return Vec::new();
    };
    let Some(raw) = storage.get_item(&config.storage_key) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        // Underscore binding: the fallback `warn!` discards its fields.
        Err(_err) => {
            warn!(
                storage_key = %config.storage_key,
                error = %_err,
                "bimap cache load failed; starting empty"
            );
            Vec::new()
        }
    }
}

fn schedule_save<A, B>(inner: &Rc<RefCell<CacheInner<A, B>>>)
where
    A: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
    B: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
{
    let mut i = inner.borrow_mut();
    let already_pending = i
        .save_timer
        .as_ref()
        .is_some_and(TimerHandle::is_pending);
    if already_pending {
        return;
    }
    let weak = Rc::downgrade(inner);
    let throttle = i.config.save_throttle;
    let timer = i.scheduler.schedule(throttle, move || {
        if let Some(inner) = weak.upgrade() {
            save_now(&inner);
        }
    });
    i.save_timer = Some(timer);
}

/// Reconcile with storage, evict by age and limit, write back, and adopt
/// the reconciled set as the in-memory state.
fn save_now<A, B>(inner: &Rc<RefCell<CacheInner<A, B>>>)
where
    A: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
    B: Clone + Eq + Hash + Serialize + DeserializeOwned + 'static,
{
    let mut i = inner.borrow_mut();
    if let Some(timer) = i.save_timer.take() {
        timer.cancel();
    }
    let now = i.scheduler.now_unix_ms();

    // Gather persisted-then-memory entries, oldest first, so later (newer)
    // entries win every conflict as the bijection is rebuilt.
    let mut combined: Vec<PersistedEntry<A, B>> = read_persisted(&i.storage, &i.config);
    for (a, b) in &i.a_to_b {
        combined.push(PersistedEntry {
            a: a.clone(),
            b: b.clone(),
            t: i.last_access.get(a).copied().unwrap_or(now),
        });
    }
    combined.sort_by_key(|e| e.t);

    let mut a_to_b: AHashMap<A, B> = AHashMap::with_capacity(combined.len());
    let mut b_to_a: AHashMap<B, A> = AHashMap::with_capacity(combined.len());
    let mut last_access: AHashMap<A, u64> = AHashMap::with_capacity(combined.len());
    for entry in combined {
        if let Some(old_b) = a_to_b.get(&entry.a).cloned() {
            if old_b != entry.b {
                b_to_a.remove(&old_b);
            }
        }
        if let Some(old_a) = b_to_a.get(&entry.b).cloned() {
            if old_a != entry.a {
                a_to_b.remove(&old_a);
                last_access.remove(&old_a);
            }
        }
        a_to_b.insert(entry.a.clone(), entry.b.clone());
        b_to_a.insert(entry.b, entry.a.clone());
        last_access.insert(entry.a, entry.t);
    }

    // Age eviction.
    let min_t = now.saturating_sub(i.config.max_age.as_millis().min(u64::MAX as u128) as u64);
    let expired: Vec<A> = last_access
        .iter()
        .filter(|(_, t)| **t < min_t)
        .map(|(a, _)| a.clone())
        .collect();
    for a in expired {
        if let Some(b) = a_to_b.remove(&a) {
            b_to_a.remove(&b);
        }
        last_access.remove(&a);
    }

    // Limit eviction: keep the most-recently-used `max_limit`.
    if a_to_b.len() > i.config.max_limit {
        let mut ranked: Vec<(A, u64)> = last_access
            .iter()
            .map(|(a, t)| (a.clone(), *t))
            .collect();
        ranked.sort_by(|x, y| y.1.cmp(&x.1));
        for (a, _) in ranked.drain(i.config.max_limit..) {
            if let Some(b) = a_to_b.remove(&a) {
                b_to_a.remove(&b);
            }
            last_access.remove(&a);
        }
    }

    if let Some(storage) = i.storage.clone() {
        let mut entries: Vec<PersistedEntry<A, B>> = a_to_b
            .iter()
            .map(|(a, b)| PersistedEntry {
                a: a.clone(),
                b: b.clone(),
                t: last_access.get(a).copied().unwrap_or(now),
            })
            .collect();
        entries.sort_by_key(|e| e.t);
        match serde_json::to_string(&entries) {
            Ok(json) => storage.set_item(&i.config.storage_key, &json),
            Err(_err) => {
                warn!(error = %_err, "bimap cache serialize failed; skipping save");
            }
        }
    }

    i.a_to_b = a_to_b;
    i.b_to_a = b_to_a;
    i.last_access = last_access;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
