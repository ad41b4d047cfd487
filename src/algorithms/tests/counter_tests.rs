// src/algorithms/tests/counter_tests.rs

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time;

    use crate::algorithms::{Algorithm, CounterLimiter};
    use crate::config::CounterConfig;
    use crate::limiter::{HasCoordinator, Limiter};
    use crate::storage::MemoryStorage;
    use crate::test_utils::create_test_memory;

    async fn create_counter(
        storage: &MemoryStorage,
        key: &str,
        throughput: u64,
        batch_size: u64,
    ) -> CounterLimiter<MemoryStorage> {
        let config = CounterConfig {
            window: Duration::from_secs(1),
            throughput,
            batch_size,
        };
        let limiter = CounterLimiter::new(storage.clone(), key, config)
            .await
            .expect("memory store accepts the counter script");
        limiter.set_anti_overload(false);
        limiter
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_exhausts_window() {
        let storage = create_test_memory();
        let limiter = create_counter(&storage, "counter:exhaust", 5, 2).await;

        for i in 0..5 {
            assert!(limiter.try_acquire().await.unwrap(), "request {} should pass", i);
        }
        assert!(!limiter.try_acquire().await.unwrap(), "window is spent");

        // 2 + 2 + 1, then the empty reply
        assert_eq!(limiter.stats().round_trips, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let storage = create_test_memory();
        let limiter = create_counter(&storage, "counter:reset", 3, 3).await;

        for _ in 0..3 {
            assert!(limiter.try_acquire().await.unwrap());
        }
        assert!(!limiter.try_acquire().await.unwrap());

        time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.try_acquire().await.unwrap(), "window not over yet");

        time::advance(Duration::from_millis(2)).await;
        assert!(limiter.try_acquire().await.unwrap(), "new window starts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_starts_at_first_grant() {
        let storage = create_test_memory();
        let limiter = create_counter(&storage, "counter:clock", 2, 2).await;

        time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire().await.unwrap());
        assert!(limiter.try_acquire().await.unwrap());
        assert!(!limiter.try_acquire().await.unwrap());

        // 1s after construction is only 500ms into the window
        time::advance(Duration::from_millis(600)).await;
        assert!(!limiter.try_acquire().await.unwrap());

        time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_processes_share_one_window() {
        let storage = create_test_memory();
        let first = create_counter(&storage, "counter:shared", 10, 4).await;
        let second = create_counter(&storage, "counter:shared", 10, 4).await;

        let mut granted = 0;
        for _ in 0..10 {
            for limiter in [&first, &second] {
                if limiter.try_acquire().await.unwrap() {
                    granted += 1;
                }
            }
        }

        assert_eq!(granted, 10, "both processes draw from one quota");
        assert_eq!(first.stats().granted + second.stats().granted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let storage = create_test_memory();
        let a = create_counter(&storage, "counter:a", 1, 1).await;
        let b = create_counter(&storage, "counter:b", 1, 1).await;

        assert!(a.try_acquire().await.unwrap());
        assert!(!a.try_acquire().await.unwrap());
        assert!(b.try_acquire().await.unwrap());
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_counter_interval_and_accessors() {
        let storage = create_test_memory();
        let limiter = create_counter(&storage, "counter:meta", 40, 8).await;

        assert_eq!(limiter.algorithm(), Algorithm::Counter);
        assert_eq!(limiter.key(), "counter:meta");
        assert_eq!(limiter.interval(), Duration::from_millis(25));
        assert_eq!(limiter.config().batch_size, 8);
        assert_eq!(
            limiter.coordinator().script_sha(),
            Algorithm::Counter.script_hash()
        );
    }

    #[tokio::test]
    async fn test_counter_interval_floors_to_nanos() {
        let storage = create_test_memory();
        let limiter = create_counter(&storage, "counter:odd", 3, 1).await;

        assert_eq!(limiter.interval(), Duration::from_nanos(333_333_333));
    }
}
