// src/bin/quota_cli.rs

use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use distributed_quota::config::{
    AlgorithmConfig, CounterConfig, InMemoryConfig, LeakyBucketConfig, LimiterConfig, RedisConfig,
    TokenBucketConfig,
};
use distributed_quota::{
    build_limiter, init_logging, Algorithm, Limiter, LimiterStats, MemoryStorage,
    RateLimiterError, RedisStorage, StorageBackend, WaitContext,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "quota_cli",
    about = "Exercise a rate limit shared through Redis from the command line"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage); falls back to REDIS_URL
    #[structopt(long)]
    redis_url: Option<String>,

    /// JSON limiter configuration; replaces every algorithm option below
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Quota key shared by every process
    #[structopt(short, long, default_value = "quota_cli")]
    key: String,

    /// Algorithm enforced by the store
    #[structopt(short, long, default_value = "counter")]
    algorithm: Algorithm,

    /// Window (or refill period for the token bucket) in milliseconds
    #[structopt(short, long, default_value = "1000")]
    window_ms: u64,

    /// Permits per window (counter, leaky bucket)
    #[structopt(short, long, default_value = "100")]
    throughput: u64,

    /// Permits fetched per store round trip (counter, token bucket)
    #[structopt(short, long, default_value = "10")]
    batch_size: u64,

    /// Token bucket capacity
    #[structopt(long, default_value = "100")]
    capacity: u64,

    /// Tokens added per period (token bucket)
    #[structopt(long, default_value = "100")]
    refill_amount: u64,

    /// Let every attempt reach the store
    #[structopt(long)]
    no_anti_overload: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Concurrent consumers take permits until a shared target is reached
    Take {
        /// Number of concurrent consumers
        #[structopt(short = "c", long, default_value = "100")]
        consumers: usize,

        /// Permits to consume in total
        #[structopt(short = "n", long, default_value = "500")]
        permits: u64,
    },

    /// Block until each permit is granted
    Wait {
        /// Number of permits to wait for
        #[structopt(short = "n", long, default_value = "20")]
        permits: usize,

        /// Give up after this many milliseconds per permit
        #[structopt(long)]
        timeout_ms: Option<u64>,
    },

    /// Run the take workload with the anti-overload throttle on and off
    Bench {
        /// Number of concurrent consumers
        #[structopt(short = "c", long, default_value = "100")]
        consumers: usize,

        /// Permits to consume per run
        #[structopt(short = "n", long, default_value = "500")]
        permits: u64,
    },
}

/// Outcome of one take workload
#[derive(Debug)]
struct TakeReport {
    label: String,
    consumed: u64,
    errors: u64,
    elapsed: Duration,
    stats: LimiterStats,
}

impl TakeReport {
    fn rate(&self) -> f64 {
        self.consumed as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

impl Opt {
    fn limiter_config(&self) -> Result<LimiterConfig, RateLimiterError> {
        if let Some(path) = &self.config {
            return LimiterConfig::from_json_file(path);
        }

        let window = Duration::from_millis(self.window_ms);
        let algorithm = match self.algorithm {
            Algorithm::Counter => AlgorithmConfig::Counter(CounterConfig {
                window,
                throughput: self.throughput,
                batch_size: self.batch_size,
            }),
            Algorithm::LeakyBucket => AlgorithmConfig::LeakyBucket(LeakyBucketConfig {
                window,
                throughput: self.throughput,
            }),
            Algorithm::TokenBucket => AlgorithmConfig::TokenBucket(TokenBucketConfig {
                window,
                capacity: self.capacity,
                refill_amount: self.refill_amount,
                batch_size: self.batch_size,
            }),
        };
        algorithm.validate()?;

        Ok(LimiterConfig {
            key: self.key.clone(),
            algorithm,
            anti_overload: !self.no_anti_overload,
        })
    }
}

async fn connect<S: StorageBackend>(config: S::Config) -> Result<S, RateLimiterError> {
    <S as StorageBackend>::new(config).await
}

async fn open_limiter(
    opt: &Opt,
    config: &LimiterConfig,
) -> Result<Arc<dyn Limiter>, RateLimiterError> {
    let limiter = match opt.storage.as_str() {
        "memory" => {
            let storage = connect::<MemoryStorage>(InMemoryConfig::default()).await?;
            build_limiter(storage, config).await?
        }
        "redis" => {
            let redis_config = match &opt.redis_url {
                Some(url) => RedisConfig::new(url.clone()),
                None => RedisConfig::from_env(),
            };
            let storage = connect::<RedisStorage>(redis_config).await?;
            build_limiter(storage, config).await?
        }
        other => {
            return Err(RateLimiterError::Config(format!(
                "unknown storage backend: {}",
                other
            )))
        }
    };

    info!(
        key = limiter.key(),
        algorithm = %limiter.algorithm(),
        interval_us = limiter.interval().as_micros() as u64,
        storage = %opt.storage,
        anti_overload = config.anti_overload,
        "Limiter ready"
    );
    Ok(Arc::from(limiter))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let opt = Opt::from_args();
    let config = opt.limiter_config()?;

    // Ctrl-C cancels whatever is running
    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    match opt.cmd {
        Command::Take { consumers, permits } => {
            let limiter = open_limiter(&opt, &config).await?;
            let report = run_take("take", limiter, consumers, permits, &shutdown).await?;
            print_reports(&[report]);
        }
        Command::Wait {
            permits,
            timeout_ms,
        } => {
            let limiter = open_limiter(&opt, &config).await?;
            run_wait(limiter.as_ref(), permits, timeout_ms, &shutdown).await?;
        }
        Command::Bench { consumers, permits } => {
            let mut reports = Vec::new();
            for anti_overload in [true, false] {
                if shutdown.is_cancelled() {
                    break;
                }
                let label = if anti_overload { "throttled" } else { "unthrottled" };
                // separate keys so the runs do not share a quota
                let run_config = LimiterConfig {
                    key: format!("{}:{}", config.key, label),
                    anti_overload,
                    ..config.clone()
                };
                let limiter = open_limiter(&opt, &run_config).await?;
                reports.push(run_take(label, limiter, consumers, permits, &shutdown).await?);
            }
            print_reports(&reports);
        }
    }

    Ok(())
}

/// Consumers loop on `try_acquire`, backing off 1-10ms after a denial,
/// until `target` permits have been consumed between them.
async fn run_take(
    label: &str,
    limiter: Arc<dyn Limiter>,
    consumers: usize,
    target: u64,
    shutdown: &CancellationToken,
) -> Result<TakeReport, Box<dyn std::error::Error>> {
    let consumed = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let progress = ProgressBar::new(target);
    progress.set_style(
        ProgressStyle::with_template("{spinner} {prefix:>12} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    progress.set_prefix(label.to_string());

    let start = Instant::now();
    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let consumed = Arc::clone(&consumed);
            let errors = Arc::clone(&errors);
            let progress = progress.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while consumed.load(Ordering::Relaxed) < target && !shutdown.is_cancelled() {
                    match limiter.try_acquire().await {
                        Ok(true) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                            progress.inc(1);
                            continue;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            warn!("Take failed: {}", e);
                        }
                    }
                    // spread retries so consumers do not hit the store in lockstep
                    let backoff = rand::rng().random_range(1..=10);
                    time::sleep(Duration::from_millis(backoff)).await;
                }
            })
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Consumer task panicked: {}", e);
        }
    }
    let elapsed = start.elapsed();
    progress.finish_with_message("done");

    Ok(TakeReport {
        label: label.to_string(),
        consumed: consumed.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        elapsed,
        stats: limiter.stats(),
    })
}

async fn run_wait(
    limiter: &dyn Limiter,
    permits: usize,
    timeout_ms: Option<u64>,
    shutdown: &CancellationToken,
) -> Result<(), RateLimiterError> {
    let start = Instant::now();

    for permit in 1..=permits {
        let mut ctx = WaitContext::new().with_cancellation(shutdown.clone());
        if let Some(ms) = timeout_ms {
            ctx = ctx.with_timeout(Duration::from_millis(ms));
        }

        let asked = Instant::now();
        match limiter.wait(&ctx).await {
            Ok(()) => println!(
                "[{:>8.3}s] permit {:>4} after {:?}",
                start.elapsed().as_secs_f64(),
                permit,
                asked.elapsed()
            ),
            Err(e @ RateLimiterError::Cancelled(_))
            | Err(e @ RateLimiterError::DeadlineTooSoon { .. }) => {
                warn!("Stopped waiting for permit {}: {}", permit, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let report = TakeReport {
        label: "wait".to_string(),
        consumed: limiter.stats().granted,
        errors: 0,
        elapsed: start.elapsed(),
        stats: limiter.stats(),
    };
    print_reports(&[report]);
    Ok(())
}

fn print_reports(reports: &[TakeReport]) {
    let mut table = Table::new();
    table.add_row(row![
        "Run",
        "Consumed",
        "Cost",
        "Rate (per s)",
        "Round trips",
        "Failed round trips",
        "Throttled",
        "Denied",
        "Errors"
    ]);
    for report in reports {
        table.add_row(row![
            report.label,
            report.consumed,
            format!("{:.3}s", report.elapsed.as_secs_f64()),
            format!("{:.1}", report.rate()),
            report.stats.round_trips,
            report.stats.failed_round_trips,
            report.stats.throttled,
            report.stats.denied,
            report.errors
        ]);
    }
    table.printstd();
}
