// src/limiter/mod.rs
//! Coordination scaffolding shared by every algorithm variant.
//!
//! A [`QuotaCoordinator`] serves permits from a locally cached batch and only
//! talks to the store when that batch is empty:
//!
//! ```plaintext
//! try_acquire ─▶ LocalThrottle ─▶ LocalBatch ─▶ RefillCoalescer ─▶ store script
//!                 (deny = Ok(false))   (fast path)   (one round trip per stampede)
//! ```
//!
//! The batch lock only guards integer arithmetic; the store round trip is
//! deduplicated by the coalescer instead.

pub mod batch;
pub mod coalesce;
pub mod context;
pub mod throttle;

pub use batch::LocalBatch;
pub use coalesce::RefillCoalescer;
pub use context::WaitContext;
pub use throttle::LocalThrottle;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::algorithms::{Algorithm, CounterLimiter, LeakyBucketLimiter, TokenBucketLimiter};
use crate::config::{AlgorithmConfig, LimiterConfig};
use crate::error::{RateLimiterError, Result};
use crate::storage::StorageBackend;
use crate::{quota_event, store_op};

/// Public contract of every limiter variant
#[async_trait]
pub trait Limiter: Send + Sync + Debug {
    /// Takes one permit without waiting.
    ///
    /// `Ok(false)` means no permit right now and is not a failure.
    async fn try_acquire(&self) -> Result<bool>;

    /// Waits for one permit, polling once per nominal interval, until the
    /// context's deadline or cancellation fires.
    async fn wait(&self, ctx: &WaitContext) -> Result<()>;

    fn key(&self) -> &str;

    fn algorithm(&self) -> Algorithm;

    /// Nominal time between two permits
    fn interval(&self) -> Duration;

    /// Switches the local anti-overload throttle on or off
    fn set_anti_overload(&self, enabled: bool);

    fn stats(&self) -> LimiterStats;
}

/// Gives access to the coordinator a limiter variant is built on
pub trait HasCoordinator: Send + Sync + Debug {
    type Storage: StorageBackend + 'static;

    fn coordinator(&self) -> &QuotaCoordinator<Self::Storage>;
}

#[async_trait]
impl<T: HasCoordinator> Limiter for T {
    async fn try_acquire(&self) -> Result<bool> {
        self.coordinator().try_acquire().await
    }

    async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        self.coordinator().wait(ctx).await
    }

    fn key(&self) -> &str {
        self.coordinator().key()
    }

    fn algorithm(&self) -> Algorithm {
        self.coordinator().algorithm()
    }

    fn interval(&self) -> Duration {
        self.coordinator().interval()
    }

    fn set_anti_overload(&self, enabled: bool) {
        self.coordinator().set_anti_overload(enabled)
    }

    fn stats(&self) -> LimiterStats {
        self.coordinator().stats()
    }
}

/// Snapshot of a coordinator's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Permits handed to callers
    pub granted: u64,
    /// Attempts that found no permit after a successful round trip
    pub denied: u64,
    /// Attempts turned away by the anti-overload throttle
    pub throttled: u64,
    /// Store round trips started
    pub round_trips: u64,
    /// Store round trips that ended in an error
    pub failed_round_trips: u64,
}

#[derive(Debug, Default)]
struct Counters {
    granted: AtomicU64,
    denied: AtomicU64,
    throttled: AtomicU64,
    round_trips: AtomicU64,
    failed_round_trips: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LimiterStats {
        LimiterStats {
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            round_trips: self.round_trips.load(Ordering::Relaxed),
            failed_round_trips: self.failed_round_trips.load(Ordering::Relaxed),
        }
    }
}

/// What a variant hands the coordinator at construction
#[derive(Debug, Clone)]
pub struct QuotaParams {
    pub algorithm: Algorithm,
    /// Positional script arguments after the key
    pub args: Vec<i64>,
    /// Polling period of `wait`
    pub interval: Duration,
    /// `permits` per `window` sizes the anti-overload throttle
    pub throttle_window: Duration,
    pub throttle_permits: u64,
}

struct Inner<S> {
    storage: S,
    key: String,
    algorithm: Algorithm,
    script_sha: String,
    args: Vec<i64>,
    interval: Duration,
    batch: LocalBatch,
    coalescer: RefillCoalescer,
    throttle: LocalThrottle,
    anti_overload: AtomicBool,
    counters: Counters,
}

/// Batched, coalesced access to one shared quota.
///
/// Cheap to clone; clones share the local batch, the throttle and the counters.
pub struct QuotaCoordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for QuotaCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Debug> Debug for QuotaCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaCoordinator")
            .field("key", &self.inner.key)
            .field("algorithm", &self.inner.algorithm)
            .field("interval", &self.inner.interval)
            .field("remaining", &self.inner.batch.remaining())
            .field("storage", &self.inner.storage)
            .finish()
    }
}

impl<S> QuotaCoordinator<S>
where
    S: StorageBackend + 'static,
{
    /// Probes the store, registers the algorithm's script and sets up the
    /// local state. The anti-overload throttle starts enabled.
    pub async fn new(storage: S, key: impl Into<String>, params: QuotaParams) -> Result<Self> {
        let key = key.into();

        storage.ping().await.map_err(|e| match e {
            RateLimiterError::StoreUnavailable(inner) => RateLimiterError::Connection(inner),
            other => other,
        })?;

        let script_sha = storage.ensure_script(params.algorithm.script()).await?;
        let throttle = LocalThrottle::for_quota(params.throttle_window, params.throttle_permits)?;

        info!(
            key = %key,
            algorithm = %params.algorithm,
            interval_us = params.interval.as_micros() as u64,
            throttle_per_second = throttle.per_second(),
            "Quota coordinator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                key,
                algorithm: params.algorithm,
                script_sha,
                args: params.args,
                interval: params.interval,
                batch: LocalBatch::new(),
                coalescer: RefillCoalescer::new(),
                throttle,
                anti_overload: AtomicBool::new(true),
                counters: Counters::default(),
            }),
        })
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn algorithm(&self) -> Algorithm {
        self.inner.algorithm
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn script_sha(&self) -> &str {
        &self.inner.script_sha
    }

    /// Permits currently cached locally
    pub fn remaining(&self) -> i64 {
        self.inner.batch.remaining()
    }

    pub fn anti_overload(&self) -> bool {
        self.inner.anti_overload.load(Ordering::Relaxed)
    }

    pub fn set_anti_overload(&self, enabled: bool) {
        self.inner.anti_overload.store(enabled, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LimiterStats {
        self.inner.counters.snapshot()
    }

    pub async fn try_acquire(&self) -> Result<bool> {
        let inner = &self.inner;

        if self.anti_overload() && !inner.throttle.allow() {
            Counters::bump(&inner.counters.throttled);
            quota_event!(inner.key.as_str(), false, "throttled");
            return Ok(false);
        }

        if inner.batch.try_take() {
            Counters::bump(&inner.counters.granted);
            quota_event!(inner.key.as_str(), true, "local");
            return Ok(true);
        }

        let refill = Arc::clone(inner);
        inner
            .coalescer
            .coalesce(&inner.key, move || async move { refill.refill().await })
            .await?;

        let granted = inner.batch.try_take();
        if granted {
            Counters::bump(&inner.counters.granted);
        } else {
            Counters::bump(&inner.counters.denied);
        }
        quota_event!(inner.key.as_str(), granted, "refill");
        Ok(granted)
    }

    pub async fn wait(&self, ctx: &WaitContext) -> Result<()> {
        if self.try_acquire().await? {
            return Ok(());
        }

        let interval = self.inner.interval;
        if let Some(deadline) = ctx.deadline() {
            let now = Instant::now();
            if deadline < now + interval {
                debug!(
                    key = %self.inner.key,
                    interval_ms = interval.as_millis() as u64,
                    "Deadline leaves less than one interval"
                );
                return Err(RateLimiterError::DeadlineTooSoon {
                    remaining: deadline.saturating_duration_since(now),
                    interval,
                });
            }
        }

        loop {
            tokio::select! {
                biased;
                err = ctx.done() => {
                    debug!(key = %self.inner.key, "Wait abandoned: {}", err);
                    return Err(err);
                }
                _ = time::sleep(interval) => {}
            }

            // a slow round trip must not outlive the context; the shared
            // refill keeps running for any other caller
            tokio::select! {
                biased;
                err = ctx.done() => {
                    debug!(key = %self.inner.key, "Wait abandoned mid refill: {}", err);
                    return Err(err);
                }
                granted = self.try_acquire() => {
                    if granted? {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<S> Inner<S>
where
    S: StorageBackend,
{
    /// One store round trip; the reply replaces the local count
    async fn refill(&self) -> Result<i64> {
        Counters::bump(&self.counters.round_trips);
        let keys = std::slice::from_ref(&self.key);
        let start = Instant::now();

        let mut result = self
            .storage
            .eval_sha(&self.script_sha, keys, &self.args)
            .await;

        if matches!(&result, Err(e) if e.is_script_missing()) {
            warn!(key = %self.key, sha = %self.script_sha, "Store lost the script, reloading");
            result = match self.storage.script_load(self.algorithm.script()).await {
                Ok(_) => {
                    self.storage
                        .eval_sha(&self.script_sha, keys, &self.args)
                        .await
                }
                Err(e) => Err(e),
            };
        }

        store_op!(
            "refill",
            self.key.as_str(),
            result,
            start.elapsed().as_millis() as u64
        );

        let remaining = match result {
            Ok(granted) => granted.max(0),
            Err(e) => {
                Counters::bump(&self.counters.failed_round_trips);
                warn!(key = %self.key, error = %e, "Refill failed");
                return Err(e);
            }
        };

        self.batch.set_remaining(remaining);
        debug!(key = %self.key, remaining, "Local batch refilled");
        Ok(remaining)
    }
}

impl<S> HasCoordinator for QuotaCoordinator<S>
where
    S: StorageBackend + 'static,
{
    type Storage = S;

    fn coordinator(&self) -> &QuotaCoordinator<S> {
        self
    }
}

/// `window / permits`, floored to whole nanoseconds and never zero
pub fn nominal_interval(window: Duration, permits: u64) -> Duration {
    let nanos = window.as_nanos() / u128::from(permits.max(1));
    Duration::from_nanos(nanos.clamp(1, u64::MAX as u128) as u64)
}

/// Window length as the store scripts expect it
pub(crate) fn as_micros_arg(window: Duration) -> i64 {
    window.as_micros().min(i64::MAX as u128) as i64
}

/// Builds the variant named by `config`
pub async fn build_limiter<S>(storage: S, config: &LimiterConfig) -> Result<Box<dyn Limiter>>
where
    S: StorageBackend + 'static,
{
    let limiter: Box<dyn Limiter> = match &config.algorithm {
        AlgorithmConfig::Counter(c) => {
            Box::new(CounterLimiter::new(storage, config.key.clone(), c.clone()).await?)
        }
        AlgorithmConfig::LeakyBucket(c) => {
            Box::new(LeakyBucketLimiter::new(storage, config.key.clone(), c.clone()).await?)
        }
        AlgorithmConfig::TokenBucket(c) => {
            Box::new(TokenBucketLimiter::new(storage, config.key.clone(), c.clone()).await?)
        }
    };
    limiter.set_anti_overload(config.anti_overload);
    Ok(limiter)
}
