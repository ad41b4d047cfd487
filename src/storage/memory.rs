// src/storage/memory.rs

// In-memory storage (for testing and single-process usage)
// Scripts are not interpreted: every registry script is recognised by its body
// and evaluated natively, under one lock, with the same external behaviour.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::algorithms::{script_hash, Algorithm};
use crate::config::InMemoryConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::StorageBackend;

/// Per-key algorithm state
#[derive(Debug, Clone, Copy)]
enum QuotaState {
    /// Permits already handed out in the current window
    Counter { used: i64 },
    /// Earliest instant (µs since store start) the next permit may leave
    Leaky { next_free_us: i64 },
    /// Tokens left and the start of the current refill period (µs)
    Bucket { tokens: i64, ts_us: i64 },
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    state: QuotaState,
    expiry: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }
}

type Entries = Arc<Mutex<HashMap<String, MemoryEntry>>>;

/// Aborts the sweeper once the last clone of the storage is gone
#[derive(Debug)]
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Entries,
    scripts: Arc<RwLock<HashMap<String, Algorithm>>>,
    anchor: Instant,
    config: InMemoryConfig,
    _cleanup_task: Option<Arc<CleanupTask>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration
    ///
    /// The background sweeper is only started when called inside a tokio runtime.
    pub fn new(config: InMemoryConfig) -> Self {
        let data: Entries = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let cleanup_task = match tokio::runtime::Handle::try_current() {
            Ok(handle) if config.use_background_task => {
                let data_clone = Arc::clone(&data);
                let period = config.cleanup_interval;

                let task = handle.spawn(async move {
                    let mut interval = time::interval(period);
                    loop {
                        interval.tick().await;
                        Self::cleanup_expired_entries(&data_clone);
                    }
                });
                Some(Arc::new(CleanupTask(task)))
            }
            _ => None,
        };

        Self {
            data,
            scripts: Arc::new(RwLock::new(HashMap::new())),
            anchor: Instant::now(),
            config,
            _cleanup_task: cleanup_task,
        }
    }

    /// Clean up expired entries
    fn cleanup_expired_entries(data: &Entries) {
        let now = Instant::now();
        let mut data = lock(data);
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        debug!(removed = before - data.len(), "Expired quota entries swept");
    }

    /// Number of live quota keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.data)
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every registered script, as `SCRIPT FLUSH` would
    pub fn flush_scripts(&self) {
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn now_us(&self, now: Instant) -> i64 {
        now.duration_since(self.anchor).as_micros() as i64
    }

    fn evaluate(&self, algorithm: Algorithm, key: &str, args: &[i64]) -> Result<i64> {
        let now = Instant::now();
        let now_us = self.now_us(now);
        let mut data = lock(&self.data);

        let current = data
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.state);

        if current.is_none() && !data.contains_key(key) && data.len() >= self.config.max_entries {
            return Err(RateLimiterError::StoreUnavailable(
                StorageError::RedisCommand("Maximum entries limit exceeded".to_string()),
            ));
        }

        let (grant, next) = match algorithm {
            Algorithm::Counter => {
                let [window_us, throughput, batch] = script_args::<3>(algorithm, args)?;
                let used = match current {
                    Some(QuotaState::Counter { used }) => used,
                    None => 0,
                    Some(_) => return Err(wrong_type(key)),
                };
                if used >= throughput {
                    return Ok(0);
                }
                let grant = batch.min(throughput - used);
                // the first grant of a window starts its clock
                let expiry = match current {
                    None => expiry_after(now, window_us),
                    Some(_) => data.get(key).and_then(|entry| entry.expiry),
                };
                (
                    grant,
                    MemoryEntry {
                        state: QuotaState::Counter {
                            used: used + grant,
                        },
                        expiry,
                    },
                )
            }
            Algorithm::LeakyBucket => {
                let [window_us, throughput] = script_args::<2>(algorithm, args)?;
                let next_free_us = match current {
                    Some(QuotaState::Leaky { next_free_us }) => next_free_us,
                    None => 0,
                    Some(_) => return Err(wrong_type(key)),
                };
                if now_us < next_free_us {
                    return Ok(0);
                }
                (
                    1,
                    MemoryEntry {
                        state: QuotaState::Leaky {
                            next_free_us: now_us + window_us / throughput,
                        },
                        expiry: expiry_after(now, window_us),
                    },
                )
            }
            Algorithm::TokenBucket => {
                let [period_us, capacity, refill, batch] = script_args::<4>(algorithm, args)?;
                let (mut tokens, mut ts_us) = match current {
                    Some(QuotaState::Bucket { tokens, ts_us }) => (tokens, ts_us),
                    None => (capacity, now_us),
                    Some(_) => return Err(wrong_type(key)),
                };
                let periods = (now_us - ts_us).max(0) / period_us;
                if periods > 0 {
                    tokens = capacity.min(tokens.saturating_add(periods.saturating_mul(refill)));
                    ts_us += periods * period_us;
                }
                let grant = batch.min(tokens);
                let periods_to_fill = capacity / refill + i64::from(capacity % refill != 0);
                let fill_us = periods_to_fill
                    .saturating_mul(period_us)
                    .saturating_add(1_000_000);
                (
                    grant,
                    MemoryEntry {
                        state: QuotaState::Bucket {
                            tokens: tokens - grant,
                            ts_us,
                        },
                        expiry: expiry_after(now, fill_us),
                    },
                )
            }
        };

        data.insert(key.to_string(), next);
        Ok(grant)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Same rounding as the scripts: PEXPIRE takes whole milliseconds, at least one
fn expiry_after(now: Instant, us: i64) -> Option<Instant> {
    let ms = (us.max(0) as u64).div_ceil(1000).max(1);
    now.checked_add(Duration::from_millis(ms))
}

fn wrong_type(key: &str) -> RateLimiterError {
    RateLimiterError::Script(format!(
        "WRONGTYPE key {} holds state of another algorithm",
        key
    ))
}

/// Checks arity and positivity the way the scripts' arithmetic would fail
fn script_args<const N: usize>(algorithm: Algorithm, args: &[i64]) -> Result<[i64; N]> {
    let parsed: [i64; N] = args.try_into().map_err(|_| {
        RateLimiterError::Script(format!(
            "{} script expects {} arguments, got {}",
            algorithm,
            N,
            args.len()
        ))
    })?;
    if parsed.iter().any(|v| *v <= 0) {
        return Err(RateLimiterError::Script(format!(
            "{} script arguments must be positive: {:?}",
            algorithm, parsed
        )));
    }
    Ok(parsed)
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Config = InMemoryConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(config))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn script_exists(&self, sha: &str) -> Result<bool> {
        let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
        Ok(scripts.contains_key(sha))
    }

    async fn script_load(&self, body: &str) -> Result<String> {
        let algorithm = Algorithm::from_script(body).ok_or_else(|| {
            RateLimiterError::Script("memory store only runs registry scripts".to_string())
        })?;
        let sha = script_hash(body);
        self.scripts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sha.clone(), algorithm);
        Ok(sha)
    }

    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[i64]) -> Result<i64> {
        let algorithm = {
            let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
            scripts.get(sha).copied()
        };
        let algorithm = algorithm.ok_or_else(|| {
            RateLimiterError::StoreUnavailable(StorageError::ScriptMissing(format!(
                "NOSCRIPT No matching script: {}",
                sha
            )))
        })?;

        let key = match keys {
            [key] => key,
            _ => {
                return Err(RateLimiterError::Script(format!(
                    "{} script expects exactly one key, got {}",
                    algorithm,
                    keys.len()
                )))
            }
        };

        self.evaluate(algorithm, key, args)
    }
}
