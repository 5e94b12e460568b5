//! Bounded exponential backoff for collaborator calls.
//!
//! Only [`RagError::Transient`] failures are retried. The delay before
//! retry `n` (1-based) is `base * 2^(n-1)`, with the exponent capped at 5:
//! with the default 1 s base that is 1 s, 2 s, 4 s, 8 s, 16 s, 32 s.

use std::future::Future;
use std::time::Duration;

use campus_rag_core::{RagError, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    operation = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(RagError::Transient(msg)) => {
                return Err(RagError::Transient(format!(
                    "{} failed after {} attempts: {}",
                    what,
                    attempt + 1,
                    msg
                )))
            }
            Err(e) => return Err(e),
        }
    }
}

/// Classify an HTTP status: 429 and 5xx are transient, other failures are not.
pub fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> RagError {
    let body: String = body.chars().take(500).collect();
    let msg = format!("{} error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        RagError::Transient(msg)
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        RagError::Configuration(msg)
    } else {
        RagError::Other(anyhow::anyhow!(msg))
    }
}

/// Network failures (connect, timeout) are transient.
pub fn network_error(service: &str, err: reqwest::Error) -> RagError {
    RagError::Transient(format!("{} request failed: {}", service, err))
}
