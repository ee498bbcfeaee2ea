//! The Beacon engine: trigger orchestration, firing, scheduling and
//! retention.
//!
//! - [`triggers::TriggerService`] wraps the trigger store with the side
//!   effects every mutation carries (creation log, platform events).
//! - [`dispatcher::Dispatcher`] turns a firing request into exactly one
//!   event log entry.
//! - [`scheduler::Scheduler`] fires due scheduled triggers.
//! - [`queue::FireQueue`] runs deferred and retried firings on a worker pool.
//! - [`retention::RetentionManager`] archives stale triggers and logs.
//! - [`engine::Engine`] wires the above together and supervises the
//!   background tasks.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod queue;
pub mod retention;
pub mod scheduler;
pub mod triggers;

pub use config::{EngineConfig, StoreConfig};
pub use dispatcher::{Dispatcher, FireOutcome, FireRequest};
pub use engine::Engine;
