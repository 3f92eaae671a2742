use crate::model::CollaboratorError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const BASE_DELAY_MS: u64 = 500;
const MAX_JITTER_MS: u64 = 750;

/// Exponential delay for the given attempt (0-based) plus random jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::rng().random_range(0..=MAX_JITTER_MS);
    Duration::from_millis(exp + jitter)
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or `max_retries`
/// extra attempts are used up.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_retries: u32,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                let delay = backoff_delay(attempt);
                warn!(label, attempt, ?delay, error = %e, "retrying");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
