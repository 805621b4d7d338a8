use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub failure_threshold: u32,
    pub consecutive_failures: u32,
    /// True once the threshold is reached and retries are suspended.
    pub open: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

/// Failure ceiling for retries.
///
/// - Counts consecutive failed synthesis attempts
/// - At the threshold, retries stop (first attempts still go out)
/// - Any success closes it again
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    consecutive_failures: Mutex<u32>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            consecutive_failures: Mutex::new(0),
        }
    }

    fn failures(&self) -> u32 {
        self.consecutive_failures.lock().map(|f| *f).unwrap_or(0)
    }

    pub fn allows_retry(&self) -> bool {
        self.failures() < self.cfg.failure_threshold
    }

    pub fn on_success(&self) {
        if let Ok(mut f) = self.consecutive_failures.lock() {
            *f = 0;
        }
    }

    pub fn on_failure(&self) {
        if let Ok(mut f) = self.consecutive_failures.lock() {
            *f = f.saturating_add(1);
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let consecutive_failures = self.failures();
        CircuitBreakerSnapshot {
            failure_threshold: self.cfg.failure_threshold,
            consecutive_failures,
            open: consecutive_failures >= self.cfg.failure_threshold,
        }
    }
}
