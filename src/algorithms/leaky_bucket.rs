// src/algorithms/leaky_bucket.rs

use crate::algorithms::Algorithm;
use crate::config::LeakyBucketConfig;
use crate::error::Result;
use crate::limiter::{as_micros_arg, nominal_interval, HasCoordinator, QuotaCoordinator, QuotaParams};
use crate::storage::StorageBackend;

/// Leaky bucket limiter
///
/// Permits drip out of the store one at a time, no closer together than
/// `window / throughput`. There is no burst and no batching: each round trip
/// yields at most one permit, so the local batch never holds more than one.
#[derive(Debug)]
pub struct LeakyBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    coordinator: QuotaCoordinator<S>,
    config: LeakyBucketConfig,
}

impl<S> LeakyBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    pub async fn new(
        storage: S,
        key: impl Into<String>,
        config: LeakyBucketConfig,
    ) -> Result<Self> {
        config.validate()?;

        let params = QuotaParams {
            algorithm: Algorithm::LeakyBucket,
            args: vec![as_micros_arg(config.window), config.throughput as i64],
            interval: nominal_interval(config.window, config.throughput),
            throttle_window: config.window,
            throttle_permits: config.throughput,
        };

        Ok(Self {
            coordinator: QuotaCoordinator::new(storage, key, params).await?,
            config,
        })
    }

    pub fn config(&self) -> &LeakyBucketConfig {
        &self.config
    }
}

impl<S> HasCoordinator for LeakyBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    type Storage = S;

    fn coordinator(&self) -> &QuotaCoordinator<S> {
        &self.coordinator
    }
}
