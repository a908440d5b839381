//! Per-call timeout with bounded, fixed-backoff retries

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use super::{CompletionRequest, CompletionService};
use crate::core::config::CompletionConfig;
use crate::core::error::CompletionError;

/// How hard to try before an error reaches the caller
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_seconds),
            max_attempts: config.max_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Wraps any completion service with the retry policy
pub struct RetryingCompletionService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: CompletionService> RetryingCompletionService<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for RetryingCompletionService<S> {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        let timeout_ms = self.policy.timeout.as_millis() as u64;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match timeout(self.policy.timeout, self.inner.complete(req)).await {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout { timeout_ms }),
            };

            match result {
                Ok(text) => {
                    if attempt > 1 {
                        log::debug!(
                            "Model '{}' answered on attempt {}",
                            req.model,
                            attempt
                        );
                    }
                    return Ok(text);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    log::warn!(
                        "Completion attempt {}/{} for model '{}' failed: {}; retrying in {:?}",
                        attempt,
                        self.policy.max_attempts,
                        req.model,
                        err,
                        self.policy.backoff
                    );
                    sleep(self.policy.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
