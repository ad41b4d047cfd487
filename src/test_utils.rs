// src/test_utils.rs

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::algorithms::{script_hash, CounterLimiter};
use crate::config::{CounterConfig, InMemoryConfig};
use crate::error::{RateLimiterError, Result, StorageError};
use crate::limiter::Limiter;
use crate::storage::{MemoryStorage, StorageBackend};

#[derive(Debug, Default)]
struct MockState {
    /// Replies handed out in order before falling back to `default_reply`
    replies: Mutex<VecDeque<Result<i64>>>,
    default_reply: AtomicI64,
    latency: Mutex<Duration>,
    down: AtomicBool,
    unreachable: AtomicBool,
    scripts: Mutex<HashSet<String>>,
    eval_calls: AtomicUsize,
    load_calls: AtomicUsize,
    last_args: Mutex<Vec<i64>>,
    last_keys: Mutex<Vec<String>>,
}

/// Programmable store for coordinator tests
///
/// Every script call returns the next scripted reply, or the default reply
/// once the script runs out. Latency, outages and lost scripts can be
/// injected; call counters are shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    state: Arc<MockState>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that answers every round trip with `reply`
    pub fn with_reply(reply: i64) -> Self {
        let storage = Self::new();
        storage.set_default_reply(reply);
        storage
    }

    pub fn set_default_reply(&self, reply: i64) {
        self.state.default_reply.store(reply, Ordering::SeqCst);
    }

    pub fn push_reply(&self, reply: Result<i64>) {
        self.state.replies.lock().unwrap().push_back(reply);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    /// Script calls fail with a connection error while down
    pub fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::SeqCst);
    }

    /// Ping fails while unreachable
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Simulates a store restart that lost its script cache
    pub fn forget_scripts(&self) {
        self.state.scripts.lock().unwrap().clear();
    }

    pub fn preload(&self, body: &str) {
        self.state.scripts.lock().unwrap().insert(script_hash(body));
    }

    pub fn eval_calls(&self) -> usize {
        self.state.eval_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.state.load_calls.load(Ordering::SeqCst)
    }

    pub fn last_args(&self) -> Vec<i64> {
        self.state.last_args.lock().unwrap().clone()
    }

    pub fn last_keys(&self) -> Vec<String> {
        self.state.last_keys.lock().unwrap().clone()
    }
}

fn connection_refused() -> RateLimiterError {
    RateLimiterError::StoreUnavailable(StorageError::RedisConnection(
        "Connection refused".to_string(),
    ))
}

#[async_trait]
impl StorageBackend for MockStorage {
    type Config = ();

    async fn new(_config: Self::Config) -> Result<Self> {
        Ok(Self::new())
    }

    async fn ping(&self) -> Result<()> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(connection_refused());
        }
        Ok(())
    }

    async fn script_exists(&self, sha: &str) -> Result<bool> {
        Ok(self.state.scripts.lock().unwrap().contains(sha))
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        self.state.load_calls.fetch_add(1, Ordering::SeqCst);
        let sha = script_hash(body);
        self.state.scripts.lock().unwrap().insert(sha.clone());
        Ok(sha)
    }

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[i64]) -> Result<i64> {
        self.state.eval_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_args.lock().unwrap() = args.to_vec();
        *self.state.last_keys.lock().unwrap() = keys.to_vec();

        let latency = *self.state.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.state.down.load(Ordering::SeqCst) {
            return Err(connection_refused());
        }
        if !self.state.scripts.lock().unwrap().contains(sha) {
            return Err(RateLimiterError::StoreUnavailable(
                StorageError::ScriptMissing(format!("NOSCRIPT {}", sha)),
            ));
        }

        let scripted = self.state.replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(self.state.default_reply.load(Ordering::SeqCst)),
        }
    }
}

/// Counter limiter over a mock store with the throttle switched off
pub async fn create_test_counter(
    storage: MockStorage,
    throughput: u64,
    batch_size: u64,
) -> CounterLimiter<MockStorage> {
    let config = CounterConfig {
        window: Duration::from_secs(1),
        throughput,
        batch_size,
    };
    let limiter = CounterLimiter::new(storage, "test:quota", config)
        .await
        .expect("mock store is reachable");
    limiter.set_anti_overload(false);
    limiter
}

/// Memory store without the background sweeper
pub fn create_test_memory() -> MemoryStorage {
    MemoryStorage::new(InMemoryConfig {
        max_entries: 1_000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(1),
    })
}
