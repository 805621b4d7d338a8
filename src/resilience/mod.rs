//! # Resilience
//!
//! Everything between "this text needs audio" and the provider call.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`queue`] | Global FIFO queue, one dispatch at a time, cancellable handles |
//! | [`rate_limiter`] | Minimum spacing between dispatches plus provider back-pressure |
//! | [`circuit_breaker`] | Consecutive-failure ceiling that suspends retries |
//! | [`retry`] | Backoff policy and the scheduler tying the pieces together |
//!
//! ```rust
//! use speech_cache::resilience::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.backoff(0), Duration::from_millis(1000));
//! assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
//! ```

pub mod circuit_breaker;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
