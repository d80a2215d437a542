// =============================================================================
// Token-bucket rate limiter — per-provider, shared across a cycle's tasks
// =============================================================================
//
// Each provider gets one bucket sized by `burst` and refilled at
// `requests_per_second`.  Tasks call `acquire()` before every request; when
// the bucket is dry the caller sleeps exactly long enough for one token to
// accumulate.  The bucket is a suspension point, so fan-out stages share it
// safely under the cooperative scheduler.
// =============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Waits longer than this are worth a warning — the provider budget is
/// undersized for the cycle's fan-out.
const SLOW_ACQUIRE_WARN: Duration = Duration::from_secs(2);

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.  Cheap to share via `Arc`.
pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    inner: Mutex<Inner>,
}

/// Serialisable snapshot of the current bucket state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub name: String,
    pub available_tokens: f64,
    pub capacity: f64,
}

impl TokenBucket {
    /// Create a full bucket.  `refill_per_sec` of zero disables refill, which
    /// only makes sense in tests.
    pub fn new(name: &str, refill_per_sec: f64, burst: u32) -> Self {
        Self {
            name: name.to_string(),
            capacity: f64::from(burst).max(1.0),
            refill_per_sec: refill_per_sec.max(0.0),
            inner: Mutex::new(Inner {
                tokens: f64::from(burst).max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        let start = Instant::now();
        loop {
            let wait = {
                let mut inner = self.inner.lock();
                self.refill(&mut inner);
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    None
                } else if self.refill_per_sec > 0.0 {
                    let deficit = 1.0 - inner.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                } else {
                    // No refill configured: yield and hope a test refills us.
                    Some(Duration::from_millis(10))
                }
            };

            match wait {
                None => {
                    let waited = start.elapsed();
                    if waited >= SLOW_ACQUIRE_WARN {
                        warn!(
                            provider = %self.name,
                            waited_ms = waited.as_millis() as u64,
                            "rate limiter stalled this request"
                        );
                    } else if waited > Duration::ZERO {
                        debug!(
                            provider = %self.name,
                            waited_ms = waited.as_millis() as u64,
                            "rate limiter delayed this request"
                        );
                    }
                    return;
                }
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Non-blocking variant for pre-flight checks.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            inner.last_refill = now;
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        RateLimitSnapshot {
            name: self.name.clone(),
            available_tokens: inner.tokens,
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("TokenBucket")
            .field("name", &self.name)
            .field("available", &snap.available_tokens)
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}
