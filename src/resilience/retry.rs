//! Retrying synthesis scheduler.
//!
//! Every attempt goes through the global [`RequestQueue`]; failed attempts are
//! retried according to [`RetryPolicy`] while the [`CircuitBreaker`] still
//! allows retries. Backoff sleeps happen outside the queue so other keys keep
//! flowing while one request waits.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use super::queue::{QueueSnapshot, RequestQueue};
use super::rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
use crate::tts::{AudioOutput, SynthesisClient, SynthesisRequest};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Retry budgets and backoff bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after rate-limit responses.
    pub max_rate_limit_retries: u32,
    /// Retries after other retryable failures (network, 5xx).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 3,
            max_retries: 1,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `min(base * 2^attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `rate_limit_retries`/`other_retries` count the retries already spent
    /// on each kind of failure; `attempt` is the 0-based failed attempt.
    pub fn decide(
        &self,
        error: &Error,
        attempt: u32,
        rate_limit_retries: u32,
        other_retries: u32,
        breaker_allows: bool,
    ) -> Decision {
        if !breaker_allows || error.is_fatal() || !error.is_retryable() {
            return Decision::Fail;
        }
        let within_budget = if error.is_rate_limited() {
            rate_limit_retries < self.config.max_rate_limit_retries
        } else {
            other_retries < self.config.max_retries
        };
        if within_budget {
            Decision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            Decision::Fail
        }
    }
}

/// Funnels synthesis through the global queue with retry, pacing and a
/// failure ceiling.
pub struct RetryScheduler {
    client: SynthesisClient,
    queue: RequestQueue,
    limiter: Arc<RateLimiter>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    /// HTTP status of a credential rejection; 0 while credentials are trusted.
    rejected_credentials: Arc<AtomicU16>,
}

impl RetryScheduler {
    /// Must be called from within a Tokio runtime (starts the queue worker).
    pub fn new(
        client: SynthesisClient,
        retry: RetryConfig,
        limiter: RateLimiterConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(limiter));
        Self {
            client,
            queue: RequestQueue::new(Arc::clone(&limiter)),
            limiter,
            breaker: CircuitBreaker::new(breaker),
            policy: RetryPolicy::new(retry),
            rejected_credentials: Arc::new(AtomicU16::new(0)),
        }
    }

    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioOutput> {
        self.synthesize_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn synthesize_with_cancel(
        &self,
        request: &SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<AudioOutput> {
        let mut attempt = 0u32;
        let mut rate_limit_retries = 0u32;
        let mut other_retries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let err = match self.dispatch(request, cancel.clone()).await {
                Ok(out) => {
                    self.breaker.on_success();
                    return Ok(out);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => err,
            };

            self.breaker.on_failure();
            if err.is_fatal() {
                if let Some(status) = err.status() {
                    self.rejected_credentials.store(status, Ordering::SeqCst);
                }
                warn!(error = %err, "provider rejected credentials; halting synthesis");
                return Err(err);
            }
            if let Error::RateLimited {
                retry_after_ms,
                remaining,
                ..
            } = err.root()
            {
                let reset = retry_after_ms.map(Duration::from_millis);
                if remaining.is_some() || reset.is_some() {
                    self.limiter.update_budget(*remaining, reset).await;
                }
            }

            match self.policy.decide(
                &err,
                attempt,
                rate_limit_retries,
                other_retries,
                self.breaker.allows_retry(),
            ) {
                Decision::Retry { delay } => {
                    if err.is_rate_limited() {
                        rate_limit_retries += 1;
                    } else {
                        other_retries += 1;
                    }
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        code = err.standard_code().code(),
                        "synthesis failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Decision::Fail => {
                    info!(
                        attempts = attempt + 1,
                        code = err.standard_code().code(),
                        breaker_open = !self.breaker.allows_retry(),
                        "synthesis failed, giving up"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn dispatch(&self, request: &SynthesisRequest, cancel: CancellationToken) -> Result<AudioOutput> {
        let client = self.client.clone();
        let rejected = Arc::clone(&self.rejected_credentials);
        let request = request.clone();
        self.queue
            .submit_with_cancel(cancel, move || async move {
                // Checked at dispatch so work queued before a rejection also stops.
                let status = rejected.load(Ordering::SeqCst);
                if status != 0 {
                    return Err(Error::Authentication {
                        status,
                        message: "credentials were rejected by an earlier request".to_string(),
                    });
                }
                client.synthesize(&request).await
            })
            .await
    }

    /// Trust credentials again, e.g. after the API key was rotated.
    pub fn reset_credentials(&self) {
        self.rejected_credentials.store(0, Ordering::SeqCst);
        self.breaker.on_success();
    }

    pub fn credentials_rejected(&self) -> bool {
        self.rejected_credentials.load(Ordering::SeqCst) != 0
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub async fn limiter_snapshot(&self) -> RateLimiterSnapshot {
        self.limiter.snapshot().await
    }
}
