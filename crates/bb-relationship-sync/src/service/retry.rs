//! Bounded retry and per-call timeouts for store calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::domain::StoreError;

/// Runs `call` under `timeout`, mapping expiry to [`StoreError::Timeout`].
pub async fn timed<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(timeout)))
}

/// Repeats `op` while it fails with a transient error, up to
/// `policy.max_attempts` attempts, sleeping with backoff in between.
///
/// `on_retry` sees the 1-based number of the attempt that just failed.
pub async fn with_retry<T, Op, Fut>(
    policy: &RetryPolicy,
    mut on_retry: impl FnMut(u32, &StoreError),
    mut op: Op,
) -> Result<T, StoreError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                on_retry(attempt, &err);
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
