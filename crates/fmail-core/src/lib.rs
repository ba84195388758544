#![forbid(unsafe_code)]

//! Core: element lifetimes, stream composition, cooperative scheduling, and
//! the bidirectional ID cache.
//!
//! FrankenMail turns a continuously mutating, externally-controlled page into
//! strongly-lifetimed, deduplicated, cancelable application objects. This
//! crate holds the primitives everything else is built from:
//!
//! - [`scheduler::Scheduler`]: an explicit cooperative event-loop handle with
//!   a deterministic lab clock for tests.
//! - [`stream::Stream`]: push streams with activation-managed sources and
//!   RAII subscriptions.
//! - [`stopper::Stopper`] / [`stopper::StopperBus`]: one-shot completion
//!   signals and their aggregate.
//! - [`lifetime`]: the snapshot-to-lifetimes transducer.
//! - [`pool::LifetimePool`]: single-upstream fan-out of live lifetimes.
//! - [`bimap_cache::BiMapCache`]: a persisted, bounded, bijective two-way ID
//!   translation cache.

pub mod bimap_cache;
pub mod lifetime;
pub mod logging;
pub mod platform;
pub mod pool;
pub mod scheduler;
pub mod stopper;
pub mod storage;
pub mod stream;

pub use lifetime::LifetimeItem;
pub use platform::Platform;
pub use pool::LifetimePool;
pub use scheduler::Scheduler;
pub use stopper::{Stopper, StopperBus};
pub use stream::{Bus, Never, Stream, StreamEvent, Subscription};
