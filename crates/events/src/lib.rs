//! Beacon platform event bus.
//!
//! - [`EventBus`] is the in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`] is the envelope published for every trigger lifecycle
//!   change, firing and retention sweep.
//! - [`names`] holds the dot-separated event names.

pub mod bus;
pub mod names;

pub use bus::{EventBus, PlatformEvent};
