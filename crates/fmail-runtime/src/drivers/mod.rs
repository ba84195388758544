#![forbid(unsafe_code)]

//! Concrete view drivers.
//!
//! Each driver wraps one kind of host element with a closed event enum
//! whose final variant is always `Destroyed` — consumers can rely on
//! exactly one terminal event followed by the end of the stream. All of
//! them are thin shells over [`crate::driver::DriverCore`].

pub mod compose;
pub mod thread_row;
pub mod toolbar;

pub use compose::{ComposeDriver, ComposeEvent};
pub use thread_row::{ThreadRowDriver, ThreadRowEvent};
pub use toolbar::{ToolbarDriver, ToolbarEvent};
