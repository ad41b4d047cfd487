// src/algorithms/tests/mod.rs

/// Tests for the fixed window counter
mod counter_tests;



/// Script registry
#[cfg(test)]
mod registry_tests {
    use std::collections::HashSet;

    use crate::algorithms::{script_hash, Algorithm};
    use crate::error::RateLimiterError;

    #[test]
    fn test_script_hash_is_stable_sha1() {
        for algorithm in Algorithm::ALL {
            let hash = algorithm.script_hash();
            assert_eq!(hash.len(), 40, "{} hash should be SHA-1 hex", algorithm);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(hash, script_hash(algorithm.script()));
        }

        // SHA-1 of the empty string, as SCRIPT LOAD "" would report
        assert_eq!(script_hash(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_every_algorithm_has_its_own_script() {
        let hashes: HashSet<_> = Algorithm::ALL.iter().map(|a| a.script_hash()).collect();
        assert_eq!(hashes.len(), Algorithm::ALL.len());

        for algorithm in Algorithm::ALL {
            assert_eq!(Algorithm::from_script(algorithm.script()), Some(algorithm));
        }
        assert_eq!(Algorithm::from_script("return 1"), None);
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.name().parse::<Algorithm>().unwrap(), algorithm);
            assert_eq!(algorithm.to_string(), algorithm.name());
        }

        assert_eq!("Leaky-Bucket".parse::<Algorithm>().unwrap(), Algorithm::LeakyBucket);
        assert_eq!("token".parse::<Algorithm>().unwrap(), Algorithm::TokenBucket);
        assert_eq!("fixed_window".parse::<Algorithm>().unwrap(), Algorithm::Counter);
        assert!(matches!(
            "sliding_log".parse::<Algorithm>(),
            Err(RateLimiterError::Config(_))
        ));
    }
}
