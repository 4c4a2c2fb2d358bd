use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::errors::CoreError;
use crate::models::settings::SyncSettings;

/// Run `future` with a deadline; elapsing maps to `CoreError::Timeout`.
pub async fn with_timeout<F, T>(
    future: F,
    duration: Duration,
    operation_name: &str,
) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            error!("Operation '{}' timed out after {:?}", operation_name, duration);
            Err(CoreError::Timeout {
                operation: operation_name.to_string(),
                seconds: duration.as_secs(),
            })
        }
    }
}

/// Run `operation` with a per-attempt timeout, retrying retryable failures
/// with exponential backoff. Non-retryable errors return immediately.
///
/// A `Retry-After` hint is honored in full when it fits within
/// `backoff_max_ms`; a longer hint ends the retries so the caller can move
/// on to another provider instead of being throttled again.
pub async fn with_timeout_retry<F, Fut, T>(
    mut operation: F,
    settings: &SyncSettings,
    operation_name: &str,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        match with_timeout(operation(), settings.adapter_timeout(), operation_name).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < settings.max_retries => {
                let mut delay = settings.backoff(attempt);
                if let CoreError::RateLimited {
                    retry_after_secs: Some(secs),
                    ..
                } = &e
                {
                    let retry_after = Duration::from_secs(*secs);
                    if retry_after > Duration::from_millis(settings.backoff_max_ms) {
                        warn!(
                            error = %e,
                            "Not retrying operation '{}': Retry-After {:?} exceeds the backoff cap",
                            operation_name,
                            retry_after
                        );
                        return Err(e);
                    }
                    delay = delay.max(retry_after);
                }
                attempt += 1;
                warn!(
                    error = %e,
                    "Retrying operation '{}' (attempt {}/{}) in {:?}",
                    operation_name,
                    attempt + 1,
                    settings.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
