// src/provider/retry.rs — Retry with exponential backoff for text generators
//
// Retries provider errors flagged retriable (429, 5xx). Unavailability and
// client errors return immediately so callers can fall back quickly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, CompletionRequest, TextGenerator};
use crate::infra::errors::{Result, VidloopError};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(15_000),
            jitter_fraction: 0.2,
        }
    }
}

pub struct RetryProvider {
    inner: Arc<dyn TextGenerator>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn TextGenerator>) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: Arc<dyn TextGenerator>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry number `attempt` (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter = deterministic_jitter(attempt, self.config.jitter_fraction);
        Duration::from_millis((capped_ms * jitter).max(1.0) as u64)
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], stable per attempt.
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

#[async_trait]
impl TextGenerator for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(c) => return Ok(c),
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(VidloopError::Provider {
                    provider,
                    message,
                    retriable: true,
                }) => {
                    return Err(VidloopError::ProviderUnavailable {
                        provider,
                        message: format!("still failing after {attempt} retries: {message}"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
