//! Shared exponential-backoff retry helper (§5: `{1, 2, 4}s`, 3 attempts).

use std::future::Future;
use std::time::Duration;

use crate::error::CrashCoreError;

const BACKOFF_SCHEDULE: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Retries `op` up to `BACKOFF_SCHEDULE.len()` times on `Transient` errors.
/// Any other error returns immediately. Exhausting retries returns the last
/// error observed.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> Result<T, CrashCoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CrashCoreError>>,
{
    let mut last_err = None;
    for delay in BACKOFF_SCHEDULE {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
    op().await.map_err(|err| last_err.unwrap_or(err))
}
