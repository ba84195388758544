#![forbid(unsafe_code)]

//! Structured logging shims.
//!
//! When the `tracing` feature is active this module re-exports the `tracing`
//! macros; call sites import them with
//! `#[cfg(feature = "tracing")] use crate::logging::warn;`. When the feature
//! is off, the crate root exports no-op `macro_rules!` fallbacks with the
//! same names, so call sites stay feature-independent:
//!
//! ```ignore
//! #[cfg(feature = "tracing")]
//! use crate::logging::warn;
//! #[cfg(not(feature = "tracing"))]
//! use crate::warn;
//! ```

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};

/// No-op fallback for `warn!` when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

/// No-op fallback for `debug!` when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

/// No-op fallback for `trace!` when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {};
}
