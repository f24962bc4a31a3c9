//! Retryable Remote Client
//!
//! Runs one remote operation with bounded automatic retry:
//! - Only `RemoteError::Transient` failures are retried
//! - Exponential backoff: `base_delay * 2^(attempt - 1)`
//! - Permanent failures and exhausted attempts propagate to the caller

use super::remote::RemoteError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Attempt cap and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Executes remote calls under a `RetryPolicy`
#[derive(Debug, Clone, Default)]
pub struct RetryableRemoteClient {
    policy: RetryPolicy,
}

impl RetryableRemoteClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    log::warn!(
                        "{} failed on attempt {}/{}, retrying in {:?}: {}",
                        label, attempt, max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        log::error!("{} failed after {} attempts: {}", label, attempt, err);
                    } else {
                        log::error!("{} failed: {}", label, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
