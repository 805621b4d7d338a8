//! Per-key request coalescing.
//!
//! Concurrent callers asking for the same key share one execution. The work
//! is spawned onto the runtime, so it finishes (and its cache writes land)
//! even if every caller stops waiting.

use crate::{Error, ErrorContext, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

type SharedResult<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

struct InFlight<T: Clone> {
    generation: u64,
    result: SharedResult<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

pub struct RequestCoalescer<T: Clone> {
    in_flight: InFlightMap<T>,
    next_generation: AtomicU64,
    joined: AtomicUsize,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            joined: AtomicUsize::new(0),
        }
    }

    /// Join the in-flight execution for `key`, or start `work` as the new one.
    ///
    /// `work` only runs when no execution for `key` is in flight. The entry is
    /// removed once it settles, success or failure, so a later call starts
    /// fresh.
    pub async fn run_or_join<F, Fut>(&self, key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut map = self.in_flight.lock().map_err(|_| poisoned())?;
            if let Some(existing) = map.get(key) {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = key, "joining in-flight request");
                existing.result.clone()
            } else {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let fut = work();
                let map_ref = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let handle = tokio::spawn(async move {
                    // Dropped on completion and on panic alike.
                    let _settled = SettleGuard {
                        map: map_ref,
                        key: owned_key,
                        generation,
                    };
                    fut.await.map_err(Arc::new)
                });
                let result: SharedResult<T> = handle
                    .map(|joined| match joined {
                        Ok(out) => out,
                        Err(e) => Err(Arc::new(Error::runtime_with_context(
                            format!("coalesced task failed: {}", e),
                            ErrorContext::new().with_source("request_coalescer"),
                        ))),
                    })
                    .boxed()
                    .shared();
                map.insert(
                    key.to_string(),
                    InFlight {
                        generation,
                        result: result.clone(),
                    },
                );
                result
            }
        };
        shared.await.map_err(Error::from_shared)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Number of calls that were served by joining an existing execution.
    pub fn joined(&self) -> usize {
        self.joined.load(Ordering::Relaxed)
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight entry it was created for, unless a newer execution
/// already replaced it.
struct SettleGuard<T: Clone> {
    map: InFlightMap<T>,
    key: String,
    generation: u64,
}

impl<T: Clone> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        let mut map = match self.map.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.get(&self.key).map(|e| e.generation) == Some(self.generation) {
            map.remove(&self.key);
        }
    }
}

fn poisoned() -> Error {
    Error::runtime_with_context(
        "in-flight map lock poisoned",
        ErrorContext::new().with_source("request_coalescer"),
    )
}
