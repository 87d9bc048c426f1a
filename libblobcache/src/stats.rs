use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::HumanBytes;
use serde::Serialize;

/// Running totals of what has been pulled into the cache by this process.
#[derive(Debug, Default)]
pub struct CacheStats {
    pulled_blob_bytes: AtomicU64,
    pulled_blobs: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub blobs: u64,
    pub bytes: u64,
}

impl CacheStats {
    /// Counts one more cached blob of `bytes` bytes and returns the new totals.
    pub fn record(&self, bytes: u64) -> CacheStatsSnapshot {
        let total_bytes = self.pulled_blob_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let total_blobs = self.pulled_blobs.fetch_add(1, Ordering::Relaxed) + 1;
        CacheStatsSnapshot {
            blobs: total_blobs,
            bytes: total_bytes,
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            blobs: self.pulled_blobs.load(Ordering::Relaxed),
            bytes: self.pulled_blob_bytes.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blobs, {}", self.blobs, HumanBytes(self.bytes))
    }
}
