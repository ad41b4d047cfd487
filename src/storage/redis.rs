// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Cmd, FromRedisValue};
use std::fmt;
use std::time::Instant;

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::StorageBackend;
use crate::store_op;

/// Redis backend shared by every limiter of a process.
///
/// `ConnectionManager` multiplexes one connection and reconnects on its own,
/// so clones are cheap and commands are issued without any local locking.
#[derive(Clone)]
pub struct RedisStorage {
    connection: ConnectionManager,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str()).map_err(|e| {
            RateLimiterError::Connection(StorageError::RedisConnection(e.to_string()))
        })?;

        let connection_future = ConnectionManager::new(client);

        let connection =
            match tokio::time::timeout(config.connection_timeout, connection_future).await {
                Ok(result) => result.map_err(|e| {
                    RateLimiterError::Connection(StorageError::RedisConnection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(RateLimiterError::Connection(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis at {} timed out after {:?}",
                            config.url, config.connection_timeout
                        ),
                    )));
                }
            };

        Ok(Self { connection, config })
    }

    /// Runs one command under the configured command timeout
    async fn query<T: FromRedisValue + Send>(&self, operation: &str, cmd: Cmd) -> Result<T> {
        let mut conn = self.connection.clone();
        let timeout = self.config.command_timeout;

        match tokio::time::timeout(timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result.map_err(RateLimiterError::from),
            Err(_) => Err(RateLimiterError::StoreUnavailable(
                StorageError::RedisConnection(format!(
                    "Redis {} timed out after {:?}",
                    operation, timeout
                )),
            )),
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Config = RedisConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Self::new(config).await
    }

    async fn ping(&self) -> Result<()> {
        let result: String = self.query("PING", redis::cmd("PING")).await?;

        if result == "PONG" {
            Ok(())
        } else {
            Err(RateLimiterError::StoreUnavailable(
                StorageError::RedisCommand(format!(
                    "Unexpected response from Redis PING: {}",
                    result
                )),
            ))
        }
    }

    async fn script_exists(&self, sha: &str) -> Result<bool> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("EXISTS").arg(sha);

        let flags: Vec<bool> = self.query("SCRIPT EXISTS", cmd).await?;
        Ok(flags.first().copied().unwrap_or(false))
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(body);

        self.query("SCRIPT LOAD", cmd).await
    }

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[i64]) -> Result<i64> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len()).arg(keys).arg(args);

        let start = Instant::now();
        let result: Result<i64> = self.query("EVALSHA", cmd).await;
        store_op!(
            "EVALSHA",
            keys.first().map(String::as_str).unwrap_or_default(),
            result,
            start.elapsed().as_millis() as u64
        );
        result
    }
}
