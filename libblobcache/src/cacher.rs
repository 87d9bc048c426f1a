use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::digest::Digest;
use crate::error::{BoxError, CacheError, Result};
use crate::puller::{Manifest, Puller};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::status::{PullState, PullStatusTracker, PullTicket};
use crate::storage::{BlobReader, BlobStore};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Makes blobs available locally, pulling each digest at most once at a time.
///
/// Concurrent callers asking for the same digest share one pull. Content is
/// only published to the [`BlobStore`] after it hashed to the requested digest.
pub struct BlobCacher {
    store: BlobStore,
    puller: Arc<dyn Puller>,
    status: PullStatusTracker,
    stats: CacheStats,
}

impl BlobCacher {
    /// `cache_path` must exist. Cache state from previous processes is not
    /// reused.
    pub async fn new(cache_path: impl AsRef<Path>, puller: Arc<dyn Puller>) -> Result<Self> {
        let store = BlobStore::new(cache_path).await?;
        Ok(Self::with_store(store, puller))
    }

    pub fn with_store(store: BlobStore, puller: Arc<dyn Puller>) -> Self {
        BlobCacher {
            store,
            puller,
            status: PullStatusTracker::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn status(&self, digest: &Digest) -> PullState {
        self.status.state(digest)
    }

    /// Ensures `digest` is cached and opens it.
    pub async fn pull_blob(&self, image: &str, digest: &Digest) -> Result<BlobReader> {
        self.ensure_cached(image, digest).await?;
        self.store.open(digest).await
    }

    pub async fn pull_manifest(&self, image: &str) -> std::result::Result<Manifest, BoxError> {
        self.puller.pull_manifest(image).await
    }

    /// Pulls `digest` from `image` unless it is already cached.
    ///
    /// Returns once the blob is cached, or with the error of the pull this call
    /// performed or waited on.
    pub async fn ensure_cached(&self, image: &str, digest: &Digest) -> Result<()> {
        let guard = match self.status.begin_or_wait(digest).await? {
            PullTicket::Cached => return Ok(()),
            PullTicket::Fetch(guard) => guard,
        };

        match self.cache_blob(image, digest).await {
            Ok(copied) => {
                let totals = self.stats.record(copied);
                tracing::info!(
                    "Cached {digest} ({} bytes). Cache: {totals}",
                    copied
                );
                guard.mark_pulled();
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Failed to cache {digest} from {image}: {err}");
                guard.mark_failed(err.clone());
                Err(err)
            }
        }
    }

    async fn cache_blob(&self, image: &str, digest: &Digest) -> Result<u64> {
        let mut blob = self
            .puller
            .pull_blob(image, digest)
            .await
            .map_err(|err| CacheError::fetch(digest, err))?;
        let mut writer = self.store.writer(digest.algorithm()).await?;

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = blob
                .read(&mut buf)
                .await
                .map_err(|err| CacheError::fetch(digest, err))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
        }
        drop(blob);

        let closed = writer.close().await?;
        let copied = closed.size();
        closed.publish(digest).await?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::puller::MemoryPuller;
    use std::time::{Duration, Instant};

    const IMAGE: &str = "example.com/test/image:latest";

    async fn cacher_with(puller: Arc<MemoryPuller>) -> (tempfile::TempDir, BlobCacher) {
        let dir = tempfile::tempdir().unwrap();
        let cacher = BlobCacher::new(dir.path(), puller).await.unwrap();
        (dir, cacher)
    }

    #[tokio::test]
    async fn test_cache_miss_pulls_and_counts() {
        let puller = Arc::new(MemoryPuller::new());
        let digest = puller.insert(&b"0123456789"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;
        assert_eq!(cacher.status(&digest), PullState::Unknown);

        cacher.ensure_cached(IMAGE, &digest).await.unwrap();
        assert_eq!(cacher.stats(), CacheStatsSnapshot { blobs: 1, bytes: 10 });
        assert_eq!(cacher.status(&digest), PullState::Pulled);

        let mut reader = cacher.pull_blob(IMAGE, &digest).await.unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(reader.read_at(&mut buf, 0).await.unwrap(), 10);
        assert_eq!(&buf, b"0123456789");
        assert_eq!(puller.blob_pulls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_cached_is_idempotent() {
        let puller = Arc::new(MemoryPuller::new());
        let digest = puller.insert(&b"same content"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;

        for _ in 0..3 {
            cacher.ensure_cached(IMAGE, &digest).await.unwrap();
        }
        assert_eq!(puller.blob_pulls(), 1);
        assert_eq!(cacher.stats().blobs, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_pull() {
        let puller = Arc::new(MemoryPuller::with_delay(Duration::from_millis(50)));
        let digest = puller.insert(&b"shared blob"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;
        let cacher = Arc::new(cacher);

        let start = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let cacher = cacher.clone();
            let digest = digest.clone();
            tasks.push(tokio::spawn(async move {
                cacher.ensure_cached(IMAGE, &digest).await.map(|_| Instant::now())
            }));
        }
        for task in tasks {
            let finished = task.await.unwrap().unwrap();
            assert!(finished.duration_since(start) >= Duration::from_millis(50));
        }
        assert_eq!(puller.blob_pulls(), 1);
        assert_eq!(cacher.stats(), CacheStatsSnapshot { blobs: 1, bytes: 11 });
    }

    #[tokio::test]
    async fn test_integrity_mismatch_is_not_cached() {
        let puller = Arc::new(MemoryPuller::new());
        let claimed = Digest::sha256(b"what the manifest promised");
        puller.insert_as(claimed.clone(), &b"what the registry sent"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;

        let err = cacher.ensure_cached(IMAGE, &claimed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
        assert_eq!(cacher.status(&claimed), PullState::Failed);
        assert!(!cacher.store().contains(&claimed).await);
        assert_eq!(cacher.stats(), CacheStatsSnapshot::default());
        assert_eq!(
            cacher.store().open(&claimed).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_observe_same_failure() {
        let puller = Arc::new(MemoryPuller::with_delay(Duration::from_millis(30)));
        let digest = Digest::sha256(b"never uploaded");
        let (_dir, cacher) = cacher_with(puller.clone()).await;
        let cacher = Arc::new(cacher);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cacher = cacher.clone();
            let digest = digest.clone();
            tasks.push(tokio::spawn(
                async move { cacher.ensure_cached(IMAGE, &digest).await },
            ));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap_err().kind(), ErrorKind::Fetch);
        }
        assert_eq!(puller.blob_pulls(), 1);
    }

    #[tokio::test]
    async fn test_failed_pull_is_retried_by_next_caller() {
        let puller = Arc::new(MemoryPuller::new());
        let data = &b"late arrival"[..];
        let digest = Digest::sha256(data);
        let (_dir, cacher) = cacher_with(puller.clone()).await;

        assert!(cacher.ensure_cached(IMAGE, &digest).await.is_err());
        assert_eq!(cacher.status(&digest), PullState::Failed);

        puller.insert(data);
        cacher.ensure_cached(IMAGE, &digest).await.unwrap();
        assert_eq!(cacher.status(&digest), PullState::Pulled);
        assert_eq!(puller.blob_pulls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_puller_hands_over_to_waiter() {
        let puller = Arc::new(MemoryPuller::with_delay(Duration::from_millis(100)));
        let digest = puller.insert(&b"interrupted layer"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;
        let cacher = Arc::new(cacher);

        let winner = {
            let cacher = cacher.clone();
            let digest = digest.clone();
            tokio::spawn(async move { cacher.ensure_cached(IMAGE, &digest).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let cacher = cacher.clone();
            let digest = digest.clone();
            tokio::spawn(async move { cacher.ensure_cached(IMAGE, &digest).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cacher.status(&digest), PullState::Pulling);
        winner.abort();
        assert!(winner.await.unwrap_err().is_cancelled());

        waiter.await.unwrap().unwrap();
        assert_eq!(cacher.status(&digest), PullState::Pulled);
        assert_eq!(puller.blob_pulls(), 2);
        assert_eq!(cacher.stats(), CacheStatsSnapshot { blobs: 1, bytes: 17 });
        assert!(cacher.store().contains(&digest).await);
    }

    #[tokio::test]
    async fn test_distinct_digests_pull_independently() {
        let puller = Arc::new(MemoryPuller::with_delay(Duration::from_millis(20)));
        let a = puller.insert(&b"layer a"[..]);
        let b = puller.insert(&b"layer b"[..]);
        let (_dir, cacher) = cacher_with(puller.clone()).await;

        let (ra, rb) = tokio::join!(cacher.ensure_cached(IMAGE, &a), cacher.ensure_cached(IMAGE, &b));
        ra.unwrap();
        rb.unwrap();
        assert_eq!(puller.blob_pulls(), 2);
        assert_eq!(cacher.stats(), CacheStatsSnapshot { blobs: 2, bytes: 14 });
    }
}
