use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub min_interval_ms: u64,
    /// Last quota figure reported by the provider.
    pub remaining: Option<u64>,
    /// Estimated wait before the next dispatch is allowed (ms), if any.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum spacing between two consecutive outbound requests.
    pub min_interval: Duration,
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Convert a requests-per-second budget into a minimum interval.
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        let min_interval = if rps == 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / rps)
        };
        Some(Self { min_interval })
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    last_dispatch: Option<Instant>,
    /// Set when the provider reports an exhausted budget.
    blocked_until: Option<Instant>,
    remaining: Option<u64>,
}

/// Paces outbound requests: at most one dispatch per `min_interval`, and none
/// while the provider has reported its budget exhausted.
///
/// A zero interval disables local pacing; provider signals still apply.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                last_dispatch: None,
                blocked_until: None,
                remaining: None,
            }),
        }
    }

    fn wait_locked(&self, st: &mut State, now: Instant) -> Duration {
        if let Some(until) = st.blocked_until {
            if until > now {
                return until - now;
            }
            st.blocked_until = None;
        }
        match st.last_dispatch {
            Some(last) if now < last + self.cfg.min_interval => last + self.cfg.min_interval - now,
            _ => Duration::ZERO,
        }
    }

    /// Wait until a dispatch is allowed and claim the slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                let wait = self.wait_locked(&mut st, now);
                if wait.is_zero() {
                    st.last_dispatch = Some(now);
                    if let Some(rem) = st.remaining.as_mut() {
                        *rem = rem.saturating_sub(1);
                    }
                    return;
                }
                wait
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Claim the slot only if no wait is needed.
    pub async fn try_acquire(&self) -> bool {
        let mut st = self.state.lock().await;
        let now = Instant::now();
        if self.wait_locked(&mut st, now).is_zero() {
            st.last_dispatch = Some(now);
            true
        } else {
            false
        }
    }

    /// Feed provider budget signals (quota headers, rate-limit responses).
    pub async fn update_budget(&self, remaining: Option<u64>, reset_after: Option<Duration>) {
        let mut st = self.state.lock().await;
        if let Some(rem) = remaining {
            st.remaining = Some(rem);
            if rem == 0 {
                let after = reset_after.unwrap_or(Duration::from_secs(1));
                st.blocked_until = Some(Instant::now() + after);
            } else {
                st.blocked_until = None;
            }
        } else if let Some(after) = reset_after {
            st.blocked_until = Some(Instant::now() + after);
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut st = self.state.lock().await;
        let wait = self.wait_locked(&mut st, Instant::now());
        RateLimiterSnapshot {
            min_interval_ms: self.cfg.min_interval.as_millis() as u64,
            remaining: st.remaining,
            estimated_wait_ms: (!wait.is_zero()).then(|| wait.as_millis() as u64),
        }
    }
}
