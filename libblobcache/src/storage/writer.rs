use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::{File, create_dir_all, remove_file, rename};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::digest::{Algorithm, Digest, Hasher};
use crate::error::{CacheError, Result};
use crate::storage::paths::PathManager;

/// A file under the staging directory that is removed again unless it was
/// moved into the blob tree.
#[derive(Debug)]
struct StagingFile {
    path: PathBuf,
    settled: bool,
}

impl StagingFile {
    async fn discard(&mut self) {
        self.settled = true;
        if let Err(err) = remove_file(&self.path).await {
            tracing::warn!("Failed to remove staging file {}: {err}", self.path.display());
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let path = std::mem::take(&mut self.path);
        // unlink off the async workers when a runtime is around
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let _ = std::fs::remove_file(path);
                });
            }
            Err(_) => {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Streaming writer for a new blob.
///
/// Bytes go to a private staging file while the digest is computed on the
/// fly. Nothing becomes visible under the blob tree until [`ClosedBlob::publish`]
/// accepts the computed digest.
pub struct BlobWriter {
    inner: BufWriter<File>,
    hasher: Hasher,
    written: u64,
    staging: StagingFile,
    path_manager: PathManager,
}

impl BlobWriter {
    pub(crate) async fn create(path_manager: PathManager, algorithm: Algorithm) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let path = path_manager.staging_data_path(&id);
        let file = File::create(&path).await?;
        Ok(BlobWriter {
            inner: BufWriter::new(file),
            hasher: algorithm.hasher(),
            written: 0,
            staging: StagingFile {
                path,
                settled: false,
            },
            path_manager,
        })
    }

    /// Number of bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and syncs the staging file and finalizes the digest.
    pub async fn close(mut self) -> Result<ClosedBlob> {
        self.inner.flush().await?;
        self.inner.get_ref().sync_all().await?;
        let BlobWriter {
            inner,
            hasher,
            written,
            staging,
            path_manager,
        } = self;
        drop(inner);
        Ok(ClosedBlob {
            digest: hasher.finalize(),
            size: written,
            staging,
            path_manager,
        })
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            let n = *n;
            self.hasher.update(&buf[..n]);
            self.written += n as u64;
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A fully written, not yet published blob.
#[derive(Debug)]
pub struct ClosedBlob {
    digest: Digest,
    size: u64,
    staging: StagingFile,
    path_manager: PathManager,
}

impl ClosedBlob {
    /// The digest computed over everything that was written.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Moves the blob to its content address if its digest equals `expected`.
    ///
    /// On mismatch the staging file is dropped and never becomes visible.
    pub async fn publish(mut self, expected: &Digest) -> Result<PathBuf> {
        if &self.digest != expected {
            self.staging.discard().await;
            return Err(CacheError::IntegrityMismatch {
                expected: expected.clone(),
                actual: self.digest.clone(),
            });
        }
        let target = self.path_manager.blob_data_path(expected);
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await?;
        }
        rename(&self.staging.path, &target).await?;
        self.staging.settled = true;
        Ok(target)
    }
}
