#![forbid(unsafe_code)]

//! Runtime: route dispatch and view-driver wiring.
//!
//! This crate sits between the page and the SDK surface. It consumes the
//! `fmail-core` primitives and exposes:
//!
//! - [`watch`]: mutation batches → snapshots → lifetime pools (the only
//!   place the SDK touches the mutation-observation contract).
//! - [`route`]: the route-view state machine, guaranteeing at most one live
//!   route view at any instant.
//! - [`driver`] / [`drivers`]: per-feature view drivers with closed event
//!   enums and exactly one terminal `Destroyed` event.
//! - [`membrane`]: the identity-keyed map deduplicating public wrappers
//!   over internal driver objects.

pub mod driver;
pub mod drivers;
pub mod membrane;
pub mod route;
pub mod watch;

pub use driver::{DriverConfig, DriverCore};
pub use membrane::Membrane;
pub use route::{NavEvent, NavTrigger, RouteKind, RoutePattern, RouteView, Router, RouterConfig};
pub use watch::{MutationBatch, WatchError};
