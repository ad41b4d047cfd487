// src/storage/tests/mod.rs


// Script checks that should hold on any backend
pub(crate) mod common {
    use crate::algorithms::{script_hash, Algorithm};
    use crate::error::Result;
    use crate::storage::StorageBackend;

    const ONE_MINUTE_US: i64 = 60_000_000;

    pub async fn test_script_lifecycle<S: StorageBackend>(storage: &S) -> Result<()> {
        let body = Algorithm::Counter.script();

        let sha = storage.script_load(body).await?;
        assert_eq!(sha, script_hash(body), "digest should match SCRIPT LOAD");
        assert!(storage.script_exists(&sha).await?);

        // an unknown digest is simply absent
        assert!(!storage.script_exists(&"0".repeat(40)).await?);

        // loading twice is harmless
        assert_eq!(storage.ensure_script(body).await?, sha);
        assert_eq!(storage.script_load(body).await?, sha);

        Ok(())
    }

    pub async fn test_unknown_script<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        let keys = [key.to_string()];
        let err = storage
            .eval_sha(&"0".repeat(40), &keys, &[1])
            .await
            .unwrap_err();
        assert!(err.is_script_missing(), "expected NOSCRIPT, got {:?}", err);
        Ok(())
    }

    pub async fn test_counter_script<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        let sha = storage.ensure_script(Algorithm::Counter.script()).await?;
        let keys = [key.to_string()];
        let args = [ONE_MINUTE_US, 5, 2];

        // 5 permits handed out in batches of at most 2
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 2);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 2);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 1);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 0);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 0);

        Ok(())
    }

    pub async fn test_leaky_bucket_script<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        let sha = storage.ensure_script(Algorithm::LeakyBucket.script()).await?;
        let keys = [key.to_string()];
        let args = [ONE_MINUTE_US, 1];

        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 1);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 0);

        Ok(())
    }

    pub async fn test_token_bucket_script<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        let sha = storage.ensure_script(Algorithm::TokenBucket.script()).await?;
        let keys = [key.to_string()];
        // capacity 5, one token per minute, batches of 3
        let args = [ONE_MINUTE_US, 5, 1, 3];

        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 3);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 2);
        assert_eq!(storage.eval_sha(&sha, &keys, &args).await?, 0);

        Ok(())
    }
}
