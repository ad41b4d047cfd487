// src/limiter/throttle.rs

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Process-local cap on how often the store may be contacted.
///
/// Sized at twice the nominal rate of the quota it protects, with a burst of
/// the same size. Rate and burst are derived in floating point:
///
/// * rate per second = `2 * permits / window.as_secs_f64()`
/// * replenish period = `window / (2 * permits)`, at least one nanosecond
/// * burst = rate per second rounded up, clamped to `1..=u32::MAX`
///
/// so sub-second windows are well defined.
pub struct LocalThrottle<C: Clock = DefaultClock> {
    limiter: RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<C::Instant>>,
    per_second: f64,
    burst: u32,
}

impl<C: Clock> fmt::Debug for LocalThrottle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalThrottle")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .finish()
    }
}

impl LocalThrottle {
    /// Throttle for a quota of `permits` per `window`
    pub fn for_quota(window: Duration, permits: u64) -> Result<Self> {
        Self::with_clock(window, permits, DefaultClock::default())
    }
}

impl<C: Clock> LocalThrottle<C> {
    pub(crate) fn with_clock(window: Duration, permits: u64, clock: C) -> Result<Self> {
        if window.is_zero() || permits == 0 {
            return Err(RateLimiterError::Config(format!(
                "cannot size a throttle for {} permits per {:?}",
                permits, window
            )));
        }

        let doubled = 2.0 * permits as f64;
        let per_second = doubled / window.as_secs_f64();
        let period = Duration::from_secs_f64(window.as_secs_f64() / doubled)
            .max(Duration::from_nanos(1));
        let burst = per_second.ceil().clamp(1.0, u32::MAX as f64) as u32;

        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                RateLimiterError::Internal(format!("invalid throttle period {:?}", period))
            })?
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            limiter: RateLimiter::direct_with_clock(quota, clock),
            per_second,
            burst,
        })
    }

    /// Non-blocking check; consumes one cell when allowed
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}
