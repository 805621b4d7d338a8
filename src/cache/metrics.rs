//! Hit/miss counters for the cache tiers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub synthesized: u64,
    pub coalesced: u64,
    pub errors: u64,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.local_hits + self.remote_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicMetrics {
    pub local_hits: AtomicU64,
    pub remote_hits: AtomicU64,
    pub misses: AtomicU64,
    pub synthesized: AtomicU64,
    pub errors: AtomicU64,
}

impl AtomicMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// `coalesced` is owned by the request coalescer and passed in.
    pub fn snapshot(&self, coalesced: u64) -> CacheMetrics {
        CacheMetrics {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            coalesced,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
