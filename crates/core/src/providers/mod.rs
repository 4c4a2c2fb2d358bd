pub mod registry;
pub mod traits;

// Market data adapters
pub mod alphavantage;
pub mod finnhub;
pub mod yahoo_finance;

// Ingestion collaborators
pub mod llm;
pub mod web;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::errors::CoreError;

/// Shared HTTP client with a request timeout; falls back to a default client.
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("market-assistant/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a non-success HTTP status to the matching `CoreError`.
///
/// 429 → `RateLimited` (honouring `Retry-After` seconds), 401/403 and other
/// failures → `ProviderUnavailable`.
pub(crate) fn check_status(provider: &str, response: Response) -> Result<Response, CoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return Err(CoreError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        });
    }
    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("HTTP {status}: credentials rejected")
        }
        _ => format!("HTTP {status}"),
    };
    Err(CoreError::provider(provider, message))
}

/// Re-tag a transport error with the provider that raised it.
pub(crate) fn tag_error(provider: &str, error: reqwest::Error) -> CoreError {
    match CoreError::from(error) {
        CoreError::ProviderUnavailable { message, .. } => CoreError::provider(provider, message),
        CoreError::RateLimited {
            retry_after_secs, ..
        } => CoreError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        },
        other => other,
    }
}
