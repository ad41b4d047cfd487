// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RateLimiterError {
    /// Invalid construction parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store did not answer the liveness probe at construction
    #[error("Connection error: {0}")]
    Connection(StorageError),

    /// A store round trip failed at call time
    #[error("Store unavailable: {0}")]
    StoreUnavailable(StorageError),

    /// The server-side script raised an error or replied with something other than an integer
    #[error("Script error: {0}")]
    Script(String),

    /// The wait deadline leaves less than one nominal interval
    #[error("Deadline too soon: {remaining:?} left, nominal interval is {interval:?}")]
    DeadlineTooSoon {
        remaining: Duration,
        interval: Duration,
    },

    /// Cancellation or deadline observed while waiting for a permit
    #[error("Wait cancelled: {0}")]
    Cancelled(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The store does not know the script hash (NOSCRIPT)
    #[error("Script not loaded: {0}")]
    ScriptMissing(String),
}

impl RateLimiterError {
    /// True when the store lost the script and a reload may fix the call.
    pub fn is_script_missing(&self) -> bool {
        matches!(
            self,
            RateLimiterError::StoreUnavailable(StorageError::ScriptMissing(_))
        )
    }
}

impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                RateLimiterError::StoreUnavailable(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                RateLimiterError::StoreUnavailable(StorageError::RedisConnection(err.to_string()))
            }
            redis::ErrorKind::NoScriptError => {
                RateLimiterError::StoreUnavailable(StorageError::ScriptMissing(err.to_string()))
            }
            // Errors raised inside a Lua script come back as plain error replies
            redis::ErrorKind::ResponseError
            | redis::ErrorKind::ExtensionError
            | redis::ErrorKind::TypeError => RateLimiterError::Script(err.to_string()),
            _ => RateLimiterError::StoreUnavailable(StorageError::RedisCommand(err.to_string())),
        }
    }
}

impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::Config(format!("invalid limiter configuration: {}", err))
    }
}

impl From<std::io::Error> for RateLimiterError {
    fn from(err: std::io::Error) -> Self {
        RateLimiterError::Config(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
