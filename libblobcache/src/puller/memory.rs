//! In-memory puller: serves blobs from a map. Useful for local development
//! and tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlobStream, Manifest, Puller};
use crate::digest::Digest;
use crate::error::BoxError;

#[derive(Default)]
pub struct MemoryPuller {
    blobs: RwLock<HashMap<Digest, Bytes>>,
    manifests: RwLock<HashMap<String, Manifest>>,
    delay: Option<Duration>,
    blob_pulls: AtomicUsize,
}

impl MemoryPuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every blob pull sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        MemoryPuller {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Stores `data` under its sha256 digest.
    pub fn insert(&self, data: impl Into<Bytes>) -> Digest {
        let data = data.into();
        let digest = Digest::sha256(&data);
        self.insert_as(digest.clone(), data);
        digest
    }

    /// Stores `data` under an arbitrary digest, which need not match it.
    pub fn insert_as(&self, digest: Digest, data: impl Into<Bytes>) {
        self.blobs.write().unwrap().insert(digest, data.into());
    }

    pub fn insert_manifest(&self, image: impl Into<String>, manifest: Manifest) {
        self.manifests.write().unwrap().insert(image.into(), manifest);
    }

    /// Number of `pull_blob` calls made so far, successful or not.
    pub fn blob_pulls(&self) -> usize {
        self.blob_pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Puller for MemoryPuller {
    async fn pull_blob(&self, image: &str, digest: &Digest) -> Result<BlobStream, BoxError> {
        self.blob_pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let data = self.blobs.read().unwrap().get(digest).cloned();
        match data {
            Some(data) => Ok(Box::pin(Cursor::new(data))),
            None => Err(format!("blob {digest} not found in {image}").into()),
        }
    }

    async fn pull_manifest(&self, image: &str) -> Result<Manifest, BoxError> {
        self.manifests
            .read()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| format!("manifest unknown: {image}").into())
    }
}
