pub mod logs;
pub mod retention;
pub mod triggers;
