// src/limiter/batch.rs

use std::sync::{Mutex, MutexGuard};

/// Permits already debited from the store and held by this process.
///
/// The lock only ever guards an integer comparison or assignment; no I/O
/// happens while it is held.
#[derive(Debug, Default)]
pub struct LocalBatch {
    remaining: Mutex<i64>,
}

impl LocalBatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, i64> {
        self.remaining.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes one permit if any is left
    pub fn try_take(&self) -> bool {
        let mut remaining = self.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return true;
        }
        false
    }

    /// Replaces the local count with a fresh store reply
    ///
    /// The store returns the batch available now, so the reply overwrites
    /// rather than adds to whatever is left.
    pub fn set_remaining(&self, value: i64) {
        *self.lock() = value;
    }

    pub fn remaining(&self) -> i64 {
        *self.lock()
    }
}
