//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument and return raw `sqlx::Error`s.
//! [`crate::PgStore`] adapts them to the store traits.

pub mod event_log_repo;
pub mod trigger_repo;

pub use event_log_repo::EventLogRepo;
pub use trigger_repo::TriggerRepo;
