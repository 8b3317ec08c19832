//! Shared retry logic for LLM adapters
//!
//! Exponential backoff with jitter for transient provider errors (rate
//! limits, 5xx, network). Permanent errors (authentication, model rejection)
//! fail immediately.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::LlmError;

/// Configuration for retry behavior on transient errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (default: 3)
    pub max_attempts: usize,
    /// Base delay in milliseconds for exponential backoff (default: 500ms)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 10000ms)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Calculate backoff delay for a given attempt (1-based)
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(10) as u32;
    let exp = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base = config.base_delay_ms.saturating_mul(exp);
    let capped = base.min(config.max_delay_ms);
    Duration::from_millis(jitter_ms(capped))
}

/// Apply ±20% jitter to a base delay
fn jitter_ms(base_ms: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as i64;
    let jitter_pct = (nanos % 41) - 20; // -20..20
    let base = base_ms as i64;
    (base + (base * jitter_pct / 100)).max(0) as u64
}

/// Retry an async operation with exponential backoff
///
/// Only transient errors are retried; everything else propagates on the
/// first failure.
pub async fn retry_with_backoff<F, Fut, T>(mut op: F, config: &RetryConfig) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts || !err.is_retryable() {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, config);
                log::warn!(
                    "llm call failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
