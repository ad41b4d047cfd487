// src/algorithms/token_bucket.rs

use tracing::debug;

use crate::algorithms::Algorithm;
use crate::config::TokenBucketConfig;
use crate::error::Result;
use crate::limiter::{as_micros_arg, nominal_interval, HasCoordinator, QuotaCoordinator, QuotaParams};
use crate::storage::StorageBackend;

/// Token Bucket limiter
///
/// The bucket starts full at `capacity` and gains `refill_amount` tokens at
/// the end of every `window`, never exceeding capacity. A round trip takes up
/// to `batch_size` tokens out of the shared bucket, so bursts up to capacity
/// are served locally while the sustained rate is `refill_amount / window`.
#[derive(Debug)]
pub struct TokenBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    coordinator: QuotaCoordinator<S>,

    /// Configuration for the token bucket
    config: TokenBucketConfig,
}

impl<S> TokenBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    pub async fn new(
        storage: S,
        key: impl Into<String>,
        config: TokenBucketConfig,
    ) -> Result<Self> {
        config.validate()?;

        let params = QuotaParams {
            algorithm: Algorithm::TokenBucket,
            args: vec![
                as_micros_arg(config.window),
                config.capacity as i64,
                config.refill_amount as i64,
                config.batch_size as i64,
            ],
            // the sustained rate is the refill, not the capacity
            interval: nominal_interval(config.window, config.refill_amount),
            // a full bucket may be drained within one window
            throttle_window: config.window,
            throttle_permits: config.refill_amount.max(config.capacity),
        };

        let coordinator = QuotaCoordinator::new(storage, key, params).await?;
        debug!(
            key = coordinator.key(),
            capacity = config.capacity,
            refill_amount = config.refill_amount,
            "Token bucket limiter created"
        );

        Ok(Self {
            coordinator,
            config,
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }
}

impl<S> HasCoordinator for TokenBucketLimiter<S>
where
    S: StorageBackend + 'static,
{
    type Storage = S;

    fn coordinator(&self) -> &QuotaCoordinator<S> {
        &self.coordinator
    }
}
