// library entry
pub mod algorithms;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{Algorithm, CounterLimiter, LeakyBucketLimiter, TokenBucketLimiter};
pub use config::{
    AlgorithmConfig, CounterConfig, LeakyBucketConfig, LimiterConfig, TokenBucketConfig,
};
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::{build_limiter, Limiter, LimiterStats, QuotaCoordinator, WaitContext};
pub use logging::init as init_logging;
pub use storage::{MemoryStorage, RedisStorage, StorageBackend};
