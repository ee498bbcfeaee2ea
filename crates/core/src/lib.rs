//! Domain rules for the Beacon trigger platform.
//!
//! This crate has zero internal dependencies so the store implementations,
//! the engine and the HTTP layer can all share the same validation, state
//! machine and idempotency rules.

pub mod error;
pub mod retention;
pub mod retry;
pub mod trigger;
pub mod types;
