// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use super::algorithms::script_hash;
use super::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::debug;

/// Core trait that all storage backends must implement
///
/// A backend is the single authoritative store behind a quota. It only has to
/// run registered scripts atomically; the limiters never read or write keys
/// directly.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // The type of configuration this storage backend accepts
    type Config: Send + Sync;

    // Creates a new instance of this storage backend with the given configuration
    async fn new(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Whether a script with this SHA-1 hex digest is registered
    async fn script_exists(&self, sha: &str) -> Result<bool>;

    /// Registers a script body and returns its digest
    async fn script_load(&self, body: &str) -> Result<String>;

    /// Runs a registered script and returns its integer reply
    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[i64]) -> Result<i64>;

    /// Registers `body` unless the store already knows it
    async fn ensure_script(&self, body: &str) -> Result<String> {
        let sha = script_hash(body);
        if !self.script_exists(&sha).await? {
            let loaded = self.script_load(body).await?;
            debug!(sha = %loaded, "Script loaded into store");
            return Ok(loaded);
        }
        Ok(sha)
    }
}
