// =============================================================================
// Data-source adapters — rate-limited, retry-wrapped, fail-closed clients
// =============================================================================
//
// Adapter contract (every provider):
//   - token-bucket rate limit acquired before each request
//   - per-call timeout from config
//   - exponential backoff retry on TRANSIENT errors only
//   - non-transient errors fail closed; the orchestrator translates them
//     into a "source unhealthy" degradation, never an abort
//
// Mocks satisfying the same contract replace real providers in tests; the
// JSON decode paths are pure functions and tested directly.
// =============================================================================

pub mod price;
pub mod pulse;
pub mod rate_limit;
pub mod volume;
pub mod warden;
pub mod whale;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use price::{PriceClient, TokenMarket};
pub use pulse::{PulseCandidate, PulseClient};
pub use rate_limit::TokenBucket;
pub use volume::{VolumeClient, VolumeSpike};
pub use warden::{WardenClient, WardenReport};
pub use whale::{WhaleClient, WhaleFlow};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rate limited us (HTTP 429)")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response decode error: {0}")]
    Decode(String),
}

impl DataSourceError {
    /// Only transient failures are worth retrying; everything else fails
    /// closed immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for DataSourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(Duration::from_secs(0))
        } else if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                Self::RateLimited
            } else {
                Self::Http {
                    status: status.as_u16(),
                    body: e.to_string(),
                }
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Health reporting
// ---------------------------------------------------------------------------

/// Per-provider health fragment for the cycle's diagnostic line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub name: String,
    pub healthy: bool,
    pub items: u32,
    pub detail: String,
}

impl SourceHealth {
    pub fn ok(name: &str, items: u32) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            items,
            detail: "ok".to_string(),
        }
    }

    pub fn down(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            healthy: false,
            items: 0,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry helper
// ---------------------------------------------------------------------------

/// Base delay for the exponential backoff ladder.
const BACKOFF_BASE_MS: u64 = 250;
/// Ceiling for any single backoff sleep.
const BACKOFF_MAX_MS: u64 = 5_000;

/// Run `op` up to `1 + max_retries` times, backing off exponentially between
/// attempts.  Retries only transient errors; the first non-transient error is
/// returned as-is.
pub async fn with_retries<T, F, Fut>(
    provider: &str,
    max_retries: u32,
    mut op: F,
) -> Result<T, DataSourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DataSourceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = (BACKOFF_BASE_MS << attempt).min(BACKOFF_MAX_MS);
                warn!(
                    provider,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay,
                    error = %e,
                    "transient source error — backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(provider, attempts = attempt + 1, error = %e, "source request failed closed");
                return Err(e);
            }
        }
    }
}

/// Fetch JSON from `url` with the client's timeout, mapping status errors
/// into the taxonomy.  Shared by every adapter.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, DataSourceError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(DataSourceError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DataSourceError::Http {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| DataSourceError::Decode(e.to_string()))
}

/// Build the shared reqwest client for an adapter.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .expect("failed to build reqwest client")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn transient_classification() {
        assert!(DataSourceError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(DataSourceError::RateLimited.is_transient());
        assert!(DataSourceError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!DataSourceError::Http { status: 404, body: String::new() }.is_transient());
        assert!(!DataSourceError::Decode("bad json".to_string()).is_transient());
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DataSourceError::Transport("flaky".to_string()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_closed_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retries("test", 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(DataSourceError::Http {
                    status: 403,
                    body: "forbidden".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let result: Result<u32, _> = with_retries("test", 1, || async {
            Err(DataSourceError::RateLimited)
        })
        .await;
        assert!(matches!(result, Err(DataSourceError::RateLimited)));
    }
}
