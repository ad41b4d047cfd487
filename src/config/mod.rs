// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::algorithms::Algorithm;
use crate::error::{RateLimiterError, Result};

/// Smallest window the store scripts can express
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Configuration for the fixed window counter algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Permits allowed per window
    pub throughput: u64,

    /// Permits fetched from the store per round trip
    pub batch_size: u64,
}

impl CounterConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.window)?;
        validate_positive("throughput", self.throughput)?;
        validate_positive("batch_size", self.batch_size)
    }
}

/// Configuration for the leaky bucket algorithm
///
/// The bucket drains one permit every `window / throughput`; it never hands
/// out more than one permit per round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakyBucketConfig {
    #[serde(with = "duration_serde")]
    pub window: Duration,

    pub throughput: u64,
}

impl LeakyBucketConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.window)?;
        validate_positive("throughput", self.throughput)
    }
}

/// Configuration for the token bucket algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Refill period: `refill_amount` tokens are added every window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Capacity of the token bucket
    pub capacity: u64,

    /// Tokens added per window
    pub refill_amount: u64,

    /// Permits fetched from the store per round trip
    pub batch_size: u64,
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.window)?;
        validate_positive("capacity", self.capacity)?;
        validate_positive("refill_amount", self.refill_amount)?;
        validate_positive("batch_size", self.batch_size)
    }
}

/// Algorithm selection plus its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Counter(CounterConfig),
    LeakyBucket(LeakyBucketConfig),
    TokenBucket(TokenBucketConfig),
}

impl AlgorithmConfig {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            AlgorithmConfig::Counter(_) => Algorithm::Counter,
            AlgorithmConfig::LeakyBucket(_) => Algorithm::LeakyBucket,
            AlgorithmConfig::TokenBucket(_) => Algorithm::TokenBucket,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AlgorithmConfig::Counter(c) => c.validate(),
            AlgorithmConfig::LeakyBucket(c) => c.validate(),
            AlgorithmConfig::TokenBucket(c) => c.validate(),
        }
    }
}

/// Everything needed to build one limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Quota key shared by every process using this limit
    pub key: String,

    #[serde(flatten)]
    pub algorithm: AlgorithmConfig,

    /// Cap on how often this process may contact the store
    #[serde(default = "default_anti_overload")]
    pub anti_overload: bool,
}

fn default_anti_overload() -> bool {
    true
}

impl LimiterConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: LimiterConfig = serde_json::from_str(raw)?;
        config.algorithm.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Upper bound for a single command round trip
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(1)
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }

    /// Reads `REDIS_URL`, falling back to a local server
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(url)
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn validate_window(window: Duration) -> Result<()> {
    if window < MIN_WINDOW {
        return Err(RateLimiterError::Config(format!(
            "window {:?} is too small, minimum is {:?}",
            window, MIN_WINDOW
        )));
    }
    Ok(())
}

fn validate_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(RateLimiterError::Config(format!(
            "{} must be greater than 0",
            name
        )));
    }
    // Lua numbers and redis integer args are signed 64-bit
    if value > i64::MAX as u64 {
        return Err(RateLimiterError::Config(format!("{} is too large", name)));
    }
    Ok(())
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
