//! Operation counters for one repository.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

/// The most recent recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Operation that failed (`find_by_id`, `create`, ...).
    pub operation: String,
    /// Error category, see [`RepositoryError::kind`].
    pub kind: String,
    /// Rendered error message.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// Snapshot of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    /// Documents read from the store.
    pub reads: u64,
    /// Documents written to the store.
    pub writes: u64,
    /// Reads served from the cache.
    pub cache_hits: u64,
    /// Cache lookups that fell through to the store.
    pub cache_misses: u64,
    /// Failed operations.
    pub errors: u64,
    /// The most recent failure.
    pub last_error: Option<LastError>,
}

/// Accumulates counters; shared by all operations of one repository.
#[derive(Debug, Default)]
pub struct StatsTracker {
    reads: AtomicU64,
    writes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

impl StatsTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `n` document reads.
    pub fn record_reads(&self, n: u64) {
        self.reads.fetch_add(n, Ordering::Relaxed);
    }

    /// Counts `n` document writes.
    pub fn record_writes(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::Relaxed);
    }

    /// Counts a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a failure, remembers it as the last error, and logs it.
    pub fn record_error(&self, operation: &str, collection: &str, error: &RepositoryError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(operation, collection, kind = error.kind(), error = %error, "repository operation failed");
        *self.last_error.lock() = Some(LastError {
            operation: operation.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            at: Utc::now(),
        });
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> RepositoryStats {
        RepositoryStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Sets every counter back to zero and forgets the last error.
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.last_error.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = StatsTracker::new();
        stats.record_reads(3);
        stats.record_writes(2);
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_error(
            "find_by_id",
            "products",
            &RepositoryError::not_found("products", "p-9"),
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reads, 3);
        assert_eq!(snapshot.writes, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.errors, 1);
        let last = snapshot.last_error.unwrap();
        assert_eq!(last.operation, "find_by_id");
        assert_eq!(last.kind, "not_found");

        stats.reset();
        assert_eq!(stats.snapshot(), RepositoryStats::default());
    }
}
