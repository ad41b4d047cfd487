// src/algorithms/mod.rs

pub mod counter;
pub mod leaky_bucket;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use counter::CounterLimiter;
pub use leaky_bucket::LeakyBucketLimiter;
pub use token_bucket::TokenBucketLimiter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RateLimiterError;

const COUNTER_SCRIPT: &str = include_str!("scripts/counter.lua");
const LEAKY_BUCKET_SCRIPT: &str = include_str!("scripts/leaky_bucket.lua");
const TOKEN_BUCKET_SCRIPT: &str = include_str!("scripts/token_bucket.lua");

/// Server-side algorithms a quota can be enforced with.
///
/// Each variant maps to one atomic script that runs inside the store. The
/// script takes the quota key as its only key, a list of integer arguments,
/// and replies with the number of permits handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Fixed window counter
    Counter,
    /// Leaky bucket, one permit per drain interval
    LeakyBucket,
    /// Token bucket with periodic refill
    TokenBucket,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::Counter,
        Algorithm::LeakyBucket,
        Algorithm::TokenBucket,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Counter => "counter",
            Algorithm::LeakyBucket => "leaky_bucket",
            Algorithm::TokenBucket => "token_bucket",
        }
    }

    /// Lua body executed by the store
    pub fn script(&self) -> &'static str {
        match self {
            Algorithm::Counter => COUNTER_SCRIPT,
            Algorithm::LeakyBucket => LEAKY_BUCKET_SCRIPT,
            Algorithm::TokenBucket => TOKEN_BUCKET_SCRIPT,
        }
    }

    /// SHA-1 hex digest the store uses as the script handle
    pub fn script_hash(&self) -> String {
        script_hash(self.script())
    }

    /// Reverse lookup used by stores that evaluate scripts natively
    pub fn from_script(body: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.script() == body)
    }
}

/// SHA-1 hex digest of a script body, as computed by `SCRIPT LOAD`
pub fn script_hash(body: &str) -> String {
    redis::Script::new(body).get_hash().to_string()
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "counter" | "fixed_window" | "fixed_window_counter" => Ok(Algorithm::Counter),
            "leaky_bucket" | "leaky" => Ok(Algorithm::LeakyBucket),
            "token_bucket" | "token" => Ok(Algorithm::TokenBucket),
            _ => Err(RateLimiterError::Config(format!("unknown algorithm: {}", s))),
        }
    }
}
