//! Retry policy for optimistic-lock conflicts.
//!
//! A [`CoreError::ConcurrentModification`] is retried immediately exactly
//! once. Any other outcome, including a second conflict, is returned as-is.

use std::future::Future;

use crate::error::CoreError;

/// Run `op`, re-running it once if the first attempt lost an optimistic-lock
/// race.
pub async fn retry_once_on_conflict<T, F, Fut>(mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    match op().await {
        Err(CoreError::ConcurrentModification { .. }) => op().await,
        other => other,
    }
}
