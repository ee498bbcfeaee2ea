//! Dot-separated platform event names.

pub const TRIGGER_CREATED: &str = "trigger.created";
pub const TRIGGER_UPDATED: &str = "trigger.updated";
pub const TRIGGER_ARCHIVED: &str = "trigger.archived";
pub const TRIGGER_FIRED: &str = "trigger.fired";
pub const RETENTION_COMPLETED: &str = "retention.completed";
