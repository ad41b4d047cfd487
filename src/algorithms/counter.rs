// src/algorithms/counter.rs

use tracing::debug;

use crate::algorithms::Algorithm;
use crate::config::CounterConfig;
use crate::error::Result;
use crate::limiter::{as_micros_arg, nominal_interval, HasCoordinator, QuotaCoordinator, QuotaParams};
use crate::storage::StorageBackend;

/// Fixed window counter limiter
///
/// The store keeps one counter per window; every round trip asks for
/// `batch_size` permits and receives whatever is left in the window, capped
/// at that batch. The window starts with the first grant and lasts `window`.
#[derive(Debug)]
pub struct CounterLimiter<S>
where
    S: StorageBackend + 'static,
{
    coordinator: QuotaCoordinator<S>,

    /// Configuration for the counter
    config: CounterConfig,
}

impl<S> CounterLimiter<S>
where
    S: StorageBackend + 'static,
{
    /// Validates the configuration, checks the store is reachable and
    /// registers the counter script.
    pub async fn new(storage: S, key: impl Into<String>, config: CounterConfig) -> Result<Self> {
        config.validate()?;

        let params = QuotaParams {
            algorithm: Algorithm::Counter,
            args: vec![
                as_micros_arg(config.window),
                config.throughput as i64,
                config.batch_size as i64,
            ],
            interval: nominal_interval(config.window, config.throughput),
            throttle_window: config.window,
            throttle_permits: config.throughput,
        };

        let coordinator = QuotaCoordinator::new(storage, key, params).await?;
        debug!(
            key = coordinator.key(),
            throughput = config.throughput,
            batch_size = config.batch_size,
            "Counter limiter created"
        );

        Ok(Self {
            coordinator,
            config,
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }
}

impl<S> HasCoordinator for CounterLimiter<S>
where
    S: StorageBackend + 'static,
{
    type Storage = S;

    fn coordinator(&self) -> &QuotaCoordinator<S> {
        &self.coordinator
    }
}
