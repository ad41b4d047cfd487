// src/limiter/coalesce.rs

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use crate::error::Result;

type SharedRefill = Shared<BoxFuture<'static, Result<i64>>>;

type InFlight = Arc<Mutex<HashMap<String, (u64, SharedRefill)>>>;

/// Keyed single-flight group for store refills.
///
/// The first caller for a key starts the work; everyone arriving while it is
/// in flight awaits the same shared future and sees the same result. The entry
/// is removed by the work itself right before it completes, so a caller
/// arriving afterwards starts a fresh execution.
///
/// Dropping a caller never cancels the work for the others: any clone of the
/// shared future can drive it to completion.
#[derive(Debug, Default)]
pub struct RefillCoalescer {
    in_flight: InFlight,
    generation: AtomicU64,
}

fn lock(
    map: &Mutex<HashMap<String, (u64, SharedRefill)>>,
) -> MutexGuard<'_, HashMap<String, (u64, SharedRefill)>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

impl RefillCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` once for every group of overlapping callers on `key`
    pub async fn coalesce<F, Fut>(&self, key: &str, work: F) -> Result<i64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<i64>> + Send + 'static,
    {
        let refill = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some((_, refill)) => {
                    trace!(key, "Joining in-flight refill");
                    refill.clone()
                }
                None => {
                    let id = self.generation.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let fut = work();

                    let refill = async move {
                        let result = fut.await;
                        let mut in_flight = lock(&registry);
                        if matches!(in_flight.get(&owned_key), Some((current, _)) if *current == id)
                        {
                            in_flight.remove(&owned_key);
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key.to_string(), (id, refill.clone()));
                    refill
                }
            }
        };

        refill.await
    }

    /// Keys with a refill currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RateLimiterError, StorageError};
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn test_overlapping_callers_share_one_execution() {
        let coalescer = Arc::new(RefillCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..20).map(|_| {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            async move {
                coalescer
                    .coalesce("quota", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }
        });

        let results = join_all(tasks).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "work should run once");
        assert!(results.iter().all(|r| matches!(r, Ok(7))));
        assert_eq!(coalescer.in_flight(), 0, "entry is cleared on completion");
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_cached() {
        let coalescer = RefillCoalescer::new();

        let first = coalescer
            .coalesce("quota", || async {
                Err(RateLimiterError::StoreUnavailable(
                    StorageError::RedisConnection("down".to_string()),
                ))
            })
            .await;
        assert!(matches!(first, Err(RateLimiterError::StoreUnavailable(_))));

        // a later caller triggers a fresh execution
        let second = coalescer.coalesce("quota", || async { Ok(3) }).await;
        assert!(matches!(second, Ok(3)));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer = RefillCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |key: &'static str| {
            let calls = Arc::clone(&calls);
            coalescer.coalesce(key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_millis(20)).await;
                Ok(1)
            })
        };

        let (a, b) = tokio::join!(run("a"), run("b"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
