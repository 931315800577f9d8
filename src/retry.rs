//! Retry with exponential backoff.
//!
//! Used by the analysis client only. Streaming channels never retry; a user
//! regenerates instead.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::ChatError;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Run `operation`, retrying transient failures up to `max_retries` times.
///
/// Non-transient errors (see [`ChatError::is_transient`]) are returned at
/// once. After the last retry the final error is returned.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && err.is_transient() => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(attempt = attempt + 1, max_retries, ?delay, error = %err, "retrying");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
